//! The image filter chain that turns an arbitrary grayscale image into a clean
//! height map. Stages always run in the same order:
//!
//! 1. tonal adjustment (brightness, then contrast about 128)
//! 2. binary threshold
//! 3. either stroke extraction or dilate / erode
//! 4. median noise reduction
//! 5. gaussian smoothing
//! 6. edge preserving (bilateral) smoothing
//! 7. inversion
//!
//! Every stage is a pure function of its input image and the config snapshot,
//! so the same input always produces byte identical output.

use std::time::Instant;

use common::config::FilterConfig;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    contours::find_contours,
    drawing::draw_filled_circle_mut,
    filter::{bilateral_filter, median_filter, separable_filter_equal},
    morphology::{grayscale_dilate, grayscale_erode, Mask},
};
use tracing::debug;

use crate::error::{ReliefError, Result};

/// Size of the image returned when there is nothing to filter.
pub const PLACEHOLDER_SIZE: u32 = 100;

/// Level used to binarize the image for stroke extraction when no threshold
/// has been applied.
const STROKE_LEVEL: u8 = 127;

/// Window size of the bilateral filter (a radius of 4).
const BILATERAL_WINDOW: u32 = 9;

/// Runs the full filter chain. Missing or empty images produce the flat
/// [`placeholder`] instead of an error.
pub fn process(image: Option<&GrayImage>, config: &FilterConfig) -> Result<GrayImage> {
    config
        .validate()
        .map_err(|err| ReliefError::invalid_input(err.to_string()))?;

    let Some(image) = image.filter(|x| x.width() > 0 && x.height() > 0) else {
        debug!("No source image, returning placeholder");
        return Ok(placeholder());
    };

    let start = Instant::now();
    let mut image = tonal_adjust(image, config.brightness, config.contrast);

    if config.threshold.enabled {
        image = threshold(&image, config.threshold.level);
    }

    if config.stroke.enabled {
        image = stroke(&image, config.stroke.thickness, config.threshold.enabled);
    } else {
        if config.dilate > 0 {
            image = dilate(&image, config.dilate);
        }
        if config.erode > 0 {
            image = erode(&image, config.erode);
        }
    }

    if config.noise_reduction > 0 {
        image = median(&image, config.noise_reduction);
    }

    if config.smoothing > 0.0 {
        image = smooth(&image, config.smoothing);
    }

    if config.artistic_smoothing.enabled && config.artistic_smoothing.strength > 0.0 {
        image = bilateral(&image, config.artistic_smoothing.strength);
    }

    if config.invert {
        invert(&mut image);
    }

    debug!(
        "Filtered {}x{} image in {:?}",
        image.width(),
        image.height(),
        start.elapsed()
    );
    Ok(image)
}

/// A flat black image used when no source is loaded.
pub fn placeholder() -> GrayImage {
    GrayImage::new(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE)
}

/// Multiplies by `brightness`, then rescales about 128 by `contrast`. Results
/// are clipped to 0-255 and truncated.
pub fn tonal_adjust(image: &GrayImage, brightness: f32, contrast: f32) -> GrayImage {
    if brightness == 1.0 && contrast == 1.0 {
        return image.clone();
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let mut value = pixel[0] as f32 * brightness;
        value = 128.0 + contrast * (value - 128.0);
        pixel[0] = value.clamp(0.0, 255.0) as u8;
    }
    out
}

/// Pixels strictly above `level` become 255, everything else 0.
pub fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}

/// Replaces the image with the outlines of its white regions, drawn
/// `thickness` pixels wide on a black canvas. Fills are discarded.
pub fn stroke(image: &GrayImage, thickness: u32, already_binary: bool) -> GrayImage {
    let binary = if already_binary {
        image.clone()
    } else {
        threshold(image, STROKE_LEVEL)
    };

    let contours = find_contours::<i32>(&binary);
    let mut canvas = GrayImage::new(image.width(), image.height());
    let radius = (thickness / 2) as i32;
    let white = Luma([255]);

    for point in contours.iter().flat_map(|x| x.points.iter()) {
        if radius == 0 {
            canvas.put_pixel(point.x as u32, point.y as u32, white);
        } else {
            draw_filled_circle_mut(&mut canvas, (point.x, point.y), radius, white);
        }
    }

    debug!("Stroked {} contours", contours.len());
    canvas
}

/// Grayscale dilation with a `(2r + 1)²` square.
pub fn dilate(image: &GrayImage, radius: u32) -> GrayImage {
    grayscale_dilate(image, &square_mask(radius))
}

/// Grayscale erosion with a `(2r + 1)²` square.
pub fn erode(image: &GrayImage, radius: u32) -> GrayImage {
    grayscale_erode(image, &square_mask(radius))
}

fn square_mask(radius: u32) -> Mask {
    Mask::square(radius.min(u8::MAX as u32) as u8)
}

/// Median filter over a `(2r + 1)²` window.
pub fn median(image: &GrayImage, radius: u32) -> GrayImage {
    median_filter(image, radius, radius)
}

/// Kernel size used for a smoothing strength, always odd.
pub fn smoothing_kernel_size(strength: f32) -> usize {
    (strength * 2.0).max(0.0).floor() as usize * 2 + 1
}

/// Separable gaussian blur. The kernel size comes from `strength` and the
/// sigma from the kernel size, edges are clamped.
pub fn smooth(image: &GrayImage, strength: f32) -> GrayImage {
    let size = smoothing_kernel_size(strength);
    if size <= 1 {
        return image.clone();
    }

    let half = (size / 2) as i32;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mut kernel = (-half..=half)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect::<Vec<_>>();
    let sum = kernel.iter().sum::<f32>();
    kernel.iter_mut().for_each(|x| *x /= sum);

    // Filter in floats so the result can be rounded instead of truncated.
    let (width, height) = image.dimensions();
    let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[0] as f32]));
    let blurred = separable_filter_equal(&levels, &kernel);

    GrayImage::from_fn(width, height, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

/// Edge preserving smoothing. Pixels are averaged with neighbours in a 9x9
/// window, weighted by both distance and intensity difference, so flat
/// regions blur while strong edges survive. Both sigmas are
/// `floor(1.5 * strength)`.
pub fn bilateral(image: &GrayImage, strength: f32) -> GrayImage {
    let sigma = (strength * 1.5).floor();
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    bilateral_filter(image, BILATERAL_WINDOW, sigma, sigma)
}

/// `pixel = 255 - pixel`.
pub fn invert(image: &mut GrayImage) {
    image::imageops::invert(image);
}

#[cfg(test)]
mod tests {
    use common::config::{ArtisticSmoothingConfig, StrokeConfig, ThresholdConfig};
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;

    fn uniform(size: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(size, size, Luma([value]))
    }

    /// White rectangle covering `[x0, x1) x [y0, y1)` on black.
    fn rectangle(size: u32, (x0, y0): (u32, u32), (x1, y1): (u32, u32)) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x0..x1).contains(&x) && (y0..y1).contains(&y) { 255 } else { 0 }])
        })
    }

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn missing_input_is_placeholder() {
        let config = FilterConfig::default();
        let out = process(None, &config).unwrap();
        assert_eq!(out.dimensions(), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
        assert!(out.pixels().all(|p| p[0] == 0));

        let empty = GrayImage::new(0, 0);
        let out = process(Some(&empty), &config).unwrap();
        assert_eq!(out.dimensions(), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FilterConfig {
            brightness: f32::INFINITY,
            ..Default::default()
        };
        let err = process(Some(&uniform(4, 10)), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn default_config_is_identity() {
        let image = gradient(17, 9);
        assert_eq!(process(Some(&image), &FilterConfig::default()).unwrap(), image);
    }

    #[test]
    fn tonal_adjust_clips_and_scales() {
        let image = GrayImage::from_raw(3, 1, vec![0, 100, 200]).unwrap();
        let out = tonal_adjust(&image, 2.0, 1.0);
        assert_eq!(out.into_raw(), vec![0, 200, 255]);

        let out = tonal_adjust(&image, 1.0, 2.0);
        // 128 + 2 * (v - 128)
        assert_eq!(out.into_raw(), vec![0, 72, 255]);
    }

    #[test]
    fn threshold_boundary() {
        let config = |level| FilterConfig {
            threshold: ThresholdConfig {
                enabled: true,
                level,
            },
            ..Default::default()
        };

        let black = process(Some(&uniform(8, 127)), &config(128)).unwrap();
        assert!(black.pixels().all(|p| p[0] == 0));

        let white = process(Some(&uniform(8, 128)), &config(127)).unwrap();
        assert!(white.pixels().all(|p| p[0] == 255));

        let equal = process(Some(&uniform(8, 128)), &config(128)).unwrap();
        assert!(equal.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn threshold_output_is_binary() {
        let out = threshold(&gradient(32, 32), 100);
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn dilate_then_erode_restores_rectangle() {
        let image = rectangle(40, (12, 10), (25, 30));
        for radius in 1..=4 {
            let closed = erode(&dilate(&image, radius), radius);
            assert_eq!(closed, image, "radius {radius}");
        }
    }

    #[test]
    fn dilate_grows_by_radius() {
        let image = rectangle(20, (8, 8), (12, 12));
        let grown = dilate(&image, 2);
        let count = grown.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(count, 8 * 8);
    }

    #[test]
    fn stroke_discards_fill() {
        let image = rectangle(30, (5, 5), (25, 25));
        let config = FilterConfig {
            stroke: StrokeConfig {
                enabled: true,
                thickness: 1,
            },
            dilate: 5,
            ..Default::default()
        };
        let out = process(Some(&image), &config).unwrap();

        // Outline pixels survive, the interior and the outside do not. The
        // dilate setting is ignored while stroking.
        assert_eq!(out.get_pixel(5, 5)[0], 255);
        assert_eq!(out.get_pixel(24, 15)[0], 255);
        assert_eq!(out.get_pixel(15, 15)[0], 0);
        assert_eq!(out.get_pixel(2, 2)[0], 0);
        assert_eq!(out.pixels().filter(|p| p[0] == 255).count(), 4 * 19);
    }

    #[test]
    fn thick_stroke_is_wider() {
        let image = rectangle(30, (5, 5), (25, 25));
        let thin = stroke(&image, 1, false);
        let thick = stroke(&image, 5, false);
        let count = |x: &GrayImage| x.pixels().filter(|p| p[0] == 255).count();
        assert!(count(&thick) > count(&thin));
        assert_eq!(thick.get_pixel(7, 15)[0], 255);
        assert_eq!(thick.get_pixel(15, 15)[0], 0);
    }

    #[test]
    fn median_removes_speckle() {
        let mut image = uniform(9, 50);
        image.put_pixel(4, 4, Luma([255]));
        let out = median(&image, 1);
        assert!(out.pixels().all(|p| p[0] == 50));
    }

    #[test]
    fn smoothing_kernel_sizes() {
        assert_eq!(smoothing_kernel_size(0.0), 1);
        assert_eq!(smoothing_kernel_size(0.4), 1);
        assert_eq!(smoothing_kernel_size(0.5), 3);
        assert_eq!(smoothing_kernel_size(1.0), 5);
        assert_eq!(smoothing_kernel_size(2.7), 11);
    }

    #[test]
    fn smoothing_keeps_flat_regions_and_softens_edges() {
        let flat = uniform(12, 128);
        assert_eq!(smooth(&flat, 2.0), flat);

        let edge = rectangle(20, (10, 0), (20, 20));
        let out = smooth(&edge, 1.0);
        let value = out.get_pixel(10, 10)[0];
        assert!(value > 0 && value < 255, "edge pixel {value}");
        assert_eq!(out.get_pixel(0, 10)[0], 0);
        assert_eq!(out.get_pixel(19, 10)[0], 255);
    }

    #[test]
    fn smoothing_matches_direct_convolution() {
        let image = gradient(9, 7);
        let out = smooth(&image, 1.0);

        let size = smoothing_kernel_size(1.0) as i32;
        let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
        let weights = (0..size)
            .map(|i| (-((i - size / 2).pow(2) as f32) / (2.0 * sigma * sigma)).exp())
            .collect::<Vec<_>>();
        let total = weights.iter().sum::<f32>().powi(2);

        for (x, y, pixel) in out.enumerate_pixels() {
            let mut sum = 0.0;
            for (i, wy) in weights.iter().enumerate() {
                for (j, wx) in weights.iter().enumerate() {
                    let sx = (x as i32 + j as i32 - size / 2).clamp(0, 8) as u32;
                    let sy = (y as i32 + i as i32 - size / 2).clamp(0, 6) as u32;
                    sum += wx * wy * image.get_pixel(sx, sy)[0] as f32;
                }
            }
            let expected = (sum / total).round() as i32;
            assert!((pixel[0] as i32 - expected).abs() <= 1, "({x}, {y})");
        }
    }

    #[test]
    fn bilateral_preserves_hard_edges() {
        let edge = rectangle(20, (10, 0), (20, 20));
        let config = FilterConfig {
            artistic_smoothing: ArtisticSmoothingConfig {
                enabled: true,
                strength: 10.0,
            },
            ..Default::default()
        };
        assert_eq!(process(Some(&edge), &config).unwrap(), edge);

        let mut noisy = uniform(20, 100);
        noisy.put_pixel(5, 5, Luma([110]));
        let out = bilateral(&noisy, 10.0);
        assert!(out.get_pixel(5, 5)[0] < 110);
    }

    #[test]
    fn invert_flips_values() {
        let mut image = GrayImage::from_raw(3, 1, vec![0, 55, 255]).unwrap();
        invert(&mut image);
        assert_eq!(image.into_raw(), vec![255, 200, 0]);
    }

    fn arb_config() -> impl Strategy<Value = FilterConfig> {
        (
            (0.5_f32..3.0, 0.5_f32..3.0, 0.0_f32..3.0, any::<bool>()),
            (any::<bool>(), any::<u8>(), 0_u32..3, 0_u32..3, 0_u32..3),
            (any::<bool>(), 1_u32..6, 0.0_f32..50.0),
        )
            .prop_map(
                |(
                    (contrast, brightness, smoothing, invert),
                    (threshold, level, dilate, erode, noise_reduction),
                    (stroke, thickness, strength),
                )| FilterConfig {
                    contrast,
                    brightness,
                    smoothing,
                    invert,
                    threshold: ThresholdConfig {
                        enabled: threshold,
                        level,
                    },
                    dilate,
                    erode,
                    noise_reduction,
                    stroke: StrokeConfig {
                        enabled: stroke,
                        thickness,
                    },
                    artistic_smoothing: ArtisticSmoothingConfig {
                        enabled: strength > 25.0,
                        strength,
                    },
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn filtering_is_deterministic(config in arb_config(), w in 2_u32..24, h in 2_u32..24) {
            let image = gradient(w, h);
            let a = process(Some(&image), &config).unwrap();
            let b = process(Some(&image), &config).unwrap();
            prop_assert_eq!(a.dimensions(), (w, h));
            prop_assert_eq!(a.into_raw(), b.into_raw());
        }
    }
}
