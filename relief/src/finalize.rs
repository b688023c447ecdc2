//! Cleanup applied to every mesh before it is serialized.

use std::collections::HashMap;

use itertools::Itertools;
use tracing::debug;

use crate::{
    error::{ReliefError, Result, Stage},
    mesh::Mesh,
    Pos,
};

/// Vertices closer than this are merged, in mm.
pub const WELD_TOLERANCE: f32 = 1e-5;

/// Faces whose doubled area is below this are dropped, in mm².
pub const MIN_DOUBLE_AREA: f32 = 1e-12;

/// Welds coincident vertices and drops degenerate faces. A mesh left with no
/// faces is an error.
pub fn finalize(mesh: Mesh) -> Result<Mesh> {
    mesh.validate()?;
    let (vertices, faces) = (mesh.vertex_count(), mesh.face_count());

    let mesh = drop_degenerate(weld(mesh, WELD_TOLERANCE));
    if mesh.is_empty() {
        return Err(ReliefError::geometry(
            Stage::Finalize,
            "mesh has no faces left after cleanup",
        ));
    }

    mesh.validate()?;
    debug!(
        "Cleaned mesh from {vertices} vertices and {faces} faces to {} and {}",
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Merges vertices within `tolerance` of each other. Vertices are bucketed on
/// a grid with `tolerance` sized cells and compared against the neighbouring
/// cells, so the first vertex of a cluster becomes its representative.
pub fn weld(mesh: Mesh, tolerance: f32) -> Mesh {
    let (vertices, faces) = mesh.into_parts();
    let tolerance = tolerance.max(f32::MIN_POSITIVE);
    let cell = |v: &Pos| v.map(|x| (x / tolerance).floor() as i64);

    let mut grid = HashMap::<[i64; 3], Vec<u32>>::new();
    let mut welded = Vec::<Pos>::with_capacity(vertices.len());
    let mut remap = Vec::with_capacity(vertices.len());

    for vertex in vertices.iter() {
        let key = cell(vertex);
        let existing = (-1..=1)
            .cartesian_product(-1..=1)
            .cartesian_product(-1..=1)
            .filter_map(|((x, y), z)| grid.get(&[key.x + x, key.y + y, key.z + z]))
            .flatten()
            .copied()
            .find(|&idx| (welded[idx as usize] - vertex).norm() <= tolerance);

        let idx = existing.unwrap_or_else(|| {
            let idx = welded.len() as u32;
            welded.push(*vertex);
            grid.entry([key.x, key.y, key.z]).or_default().push(idx);
            idx
        });
        remap.push(idx);
    }

    let faces = (faces.into_iter())
        .map(|face| face.map(|x| remap[x as usize]))
        .collect();
    Mesh::new(welded, faces)
}

/// Removes faces that reuse a vertex or have (almost) no area, then drops
/// vertices no face references.
pub fn drop_degenerate(mesh: Mesh) -> Mesh {
    let keep = (0..mesh.face_count())
        .filter(|&idx| {
            let [a, b, c] = *mesh.face(idx);
            a != b && b != c && c != a && mesh.double_area(idx) >= MIN_DOUBLE_AREA
        })
        .collect::<Vec<_>>();

    let (vertices, faces) = mesh.into_parts();
    let mut remap = vec![u32::MAX; vertices.len()];
    let mut used = Vec::new();

    let faces = (keep.into_iter())
        .map(|idx| {
            faces[idx].map(|v| {
                let slot = &mut remap[v as usize];
                if *slot == u32::MAX {
                    *slot = used.len() as u32;
                    used.push(vertices[v as usize]);
                }
                *slot
            })
        })
        .collect();

    Mesh::new(used, faces)
}
