//! Picks a meshing strategy and builds the mesh for a height field.

use std::fmt::{self, Display};

use common::{config::ModelConfig, progress::Progress};
use nalgebra::Vector2;
use tracing::{info, warn};

use crate::{
    boolean::{box_mesh, union},
    decimate::decimate,
    delaunay::triangulate,
    error::{ReliefError, Result, Stage},
    extrude::extrude_down,
    height_field::HeightField,
    lattice::lattice_solid,
    mesh::Mesh,
    Pos,
};

/// Thickness of the shell the relief surface is turned into before the
/// flat bottom union, in mm.
pub const SHELL_THICKNESS: f32 = 0.01;

/// Fraction of the relief height the base prism reaches into the relief.
pub const OVERLAP_FRACTION: f32 = 0.05;

/// The way a height field is turned into a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Only the open relief surface, without base or walls.
    ReliefOnly,
    /// The relief fused onto a flat rectangular base.
    FlatBottom,
    /// A closed lattice solid with a flat bottom at z = 0.
    Lattice,
}

impl Strategy {
    /// Relief only wins over flat bottom, which wins over the lattice.
    pub fn select(model: &ModelConfig) -> Self {
        if model.relief_only {
            Strategy::ReliefOnly
        } else if model.flat_bottom {
            Strategy::FlatBottom
        } else {
            Strategy::Lattice
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ReliefOnly => "relief only",
            Strategy::FlatBottom => "flat bottom",
            Strategy::Lattice => "lattice",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the mesh for `field` with the strategy `model` selects. Progress
/// reaches 70% once the surface has been built.
pub fn synthesize(field: &HeightField, model: &ModelConfig, progress: &Progress) -> Result<Mesh> {
    let strategy = Strategy::select(model);
    info!(
        "Meshing {}x{} height field with the {strategy} strategy",
        field.width(),
        field.height()
    );

    match strategy {
        Strategy::ReliefOnly => {
            let surface = relief_surface(field, model)?;
            progress.set(70);
            decimate(&surface, model.target_reduction)
        }
        Strategy::Lattice => {
            let solid = lattice_solid(field, model)?;
            progress.set(70);
            Ok(solid)
        }
        Strategy::FlatBottom => flat_bottom(field, model, progress),
    }
}

/// The height mapped surface over the image grid, triangulated in XY. Vertex
/// `i` is the sample at column `i % width`, row `i / width`.
pub fn relief_surface(field: &HeightField, model: &ModelConfig) -> Result<Mesh> {
    let scale = field.scale_for_width(model.width);
    let (points, vertices): (Vec<_>, Vec<_>) = field
        .iter()
        .map(|(x, y, _)| {
            let point = Vector2::new(x as f64, y as f64);
            let vertex = Pos::new(x as f32 * scale, y as f32 * scale, field.z_at(x, y, model));
            (point, vertex)
        })
        .unzip();

    let faces = triangulate(&points)?;
    if faces.is_empty() {
        return Err(ReliefError::geometry(
            Stage::Triangulation,
            format!(
                "no triangles for a {}x{} grid",
                field.width(),
                field.height()
            ),
        ));
    }

    Ok(Mesh::new(vertices, faces))
}

/// Far corner of the sample grid in XY, at z = 0.
fn footprint(field: &HeightField, model: &ModelConfig) -> Pos {
    let scale = field.scale_for_width(model.width);
    Pos::new(
        (field.width() - 1) as f32 * scale,
        (field.height() - 1) as f32 * scale,
        0.0,
    )
}

fn flat_bottom(field: &HeightField, model: &ModelConfig, progress: &Progress) -> Result<Mesh> {
    let margin = Pos::new(model.margin(), model.margin(), 0.0);

    if model.relief_height <= 0.0 {
        warn!("Relief height is zero, exporting the base alone");
        if model.base_thickness <= 0.0 {
            return Err(ReliefError::geometry(
                Stage::Boolean,
                "base thickness and relief height are both zero",
            ));
        }

        let extent = footprint(field, model) + Pos::new(0.0, 0.0, model.base_thickness);
        progress.set(70);
        return Ok(box_mesh(-margin, extent + margin));
    }

    let surface = relief_surface(field, model)?;
    let surface = decimate(&surface, model.target_reduction)?;
    progress.set(70);

    let overlap = OVERLAP_FRACTION * model.relief_height;
    let extent = footprint(field, model) + Pos::new(0.0, 0.0, model.base_thickness + overlap);
    let prism = box_mesh(-margin, extent + margin);

    let result = extrude_down(&surface, SHELL_THICKNESS).and_then(|shell| union(&shell, &prism));
    match result {
        Err(err) if model.boolean_fallback && err.stage() == Some(Stage::Boolean) => {
            warn!("Flat bottom union failed ({err}), falling back to an extruded solid");
            extrude_down(&surface, model.base_thickness.max(SHELL_THICKNESS))
        }
        result => result,
    }
}
