use common::config::ModelConfig;
use image::GrayImage;
use rayon::{iter::IndexedParallelIterator, iter::ParallelIterator, slice::ParallelSliceMut};

/// Normalized elevations, one per pixel, in `[0, 1]`. Dark pixels are high:
/// `height = 1 - value / 255`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl HeightField {
    pub fn from_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = vec![0.0; width as usize * height as usize];

        if width > 0 {
            data.par_chunks_mut(width as usize)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, out) in row.iter_mut().enumerate() {
                        *out = 1.0 - image.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
                    }
                });
        }

        Self {
            width,
            height,
            data,
        }
    }

    /// Builds a height field from raw rows, clamping values into `[0, 1]`.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y).clamp(0.0, 1.0))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Millimeters per pixel for a model `width_mm` wide.
    pub fn scale_for_width(&self, width_mm: f32) -> f32 {
        width_mm / self.width.max(1) as f32
    }

    /// The model space Z of a sample for solid strategies.
    pub fn z_at(&self, x: u32, y: u32, model: &ModelConfig) -> f32 {
        model.base_thickness + self.get(x, y) * model.relief_height
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        let width = self.width.max(1);
        (self.data.iter().enumerate())
            .map(move |(i, &h)| (i as u32 % width, i as u32 / width, h))
    }
}
