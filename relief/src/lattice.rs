use common::config::ModelConfig;
use tracing::debug;

use crate::{
    builder::MeshBuilder,
    error::{ReliefError, Result},
    height_field::HeightField,
    mesh::Mesh,
    Pos,
};

/// Sample positions of the lattice along one axis, in mm, and whether each is
/// an image sample or part of the margin ring.
struct Axis {
    coords: Vec<f32>,
    ring: bool,
}

impl Axis {
    fn new(samples: u32, scale: f32, margin: f32) -> Self {
        let ring = margin > 0.0;
        let mut coords = Vec::with_capacity(samples as usize + 2);
        if ring {
            coords.push(-margin);
        }
        coords.extend((0..samples).map(|i| i as f32 * scale));
        if ring {
            coords.push((samples - 1) as f32 * scale + margin);
        }
        Self { coords, ring }
    }

    fn len(&self) -> u32 {
        self.coords.len() as u32
    }

    /// The image sample under lattice index `i`, if it is not on the ring.
    fn sample(&self, i: u32) -> Option<u32> {
        if !self.ring {
            return Some(i);
        }
        (i > 0 && i < self.len() - 1).then(|| i - 1)
    }
}

/// Builds a closed solid from a height field: the height mapped top surface,
/// a flat bottom at z = 0 and vertical walls around the outline.
///
/// With a cutting margin the lattice gets an extra ring of samples 1 mm
/// outside the image at the base height, widening the footprint without
/// stretching the relief.
pub fn lattice_solid(field: &HeightField, model: &ModelConfig) -> Result<Mesh> {
    if field.width() < 2 || field.height() < 2 {
        return Err(ReliefError::invalid_input(format!(
            "height field of {}x{} is too small for a solid",
            field.width(),
            field.height()
        )));
    }

    let scale = field.scale_for_width(model.width);
    let margin = model.margin();
    let (xs, ys) = (
        Axis::new(field.width(), scale, margin),
        Axis::new(field.height(), scale, margin),
    );
    let (nx, ny) = (xs.len(), ys.len());

    let perimeter = perimeter(nx, ny);
    let mut builder = MeshBuilder::with_capacity(
        (nx * ny) as usize + perimeter.len() + 1,
        (nx * ny) as usize * 2 + perimeter.len() * 3,
    );

    // Top surface, one vertex per lattice sample.
    for j in 0..ny {
        for i in 0..nx {
            let z = match (xs.sample(i), ys.sample(j)) {
                (Some(x), Some(y)) => field.z_at(x, y, model),
                _ => model.base_thickness,
            };
            builder.add_vertex(Pos::new(xs.coords[i as usize], ys.coords[j as usize], z));
        }
    }

    let top = |i: u32, j: u32| j * nx + i;
    for j in 0..ny - 1 {
        for i in 0..nx - 1 {
            builder.add_quad([top(i, j), top(i + 1, j), top(i, j + 1), top(i + 1, j + 1)]);
        }
    }

    // Bottom outline, then a fan around its center.
    let bottom = (perimeter.iter())
        .map(|&(i, j)| builder.add_vertex(Pos::new(xs.coords[i as usize], ys.coords[j as usize], 0.0)))
        .collect::<Vec<_>>();
    let (x_mid, y_mid) = (
        (xs.coords[0] + xs.coords[nx as usize - 1]) / 2.0,
        (ys.coords[0] + ys.coords[ny as usize - 1]) / 2.0,
    );
    let center = builder.add_vertex(Pos::new(x_mid, y_mid, 0.0));

    for k in 0..perimeter.len() {
        let next = (k + 1) % perimeter.len();
        let (a, b) = (perimeter[k], perimeter[next]);
        builder.add_quad([bottom[k], bottom[next], top(a.0, a.1), top(b.0, b.1)]);
        builder.add_face([center, bottom[next], bottom[k]]);
    }

    let mesh = builder.build();
    debug!(
        "Built {nx}x{ny} lattice solid with {} faces",
        mesh.face_count()
    );
    Ok(mesh)
}

/// Lattice indices around the outline, counter-clockwise seen from above.
fn perimeter(nx: u32, ny: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(2 * (nx + ny) as usize);
    out.extend((0..nx - 1).map(|i| (i, 0)));
    out.extend((0..ny - 1).map(|j| (nx - 1, j)));
    out.extend((1..nx).rev().map(|i| (i, ny - 1)));
    out.extend((1..ny).rev().map(|j| (0, j)));
    out
}
