use tracing::debug;

use crate::{
    builder::MeshBuilder,
    error::{ReliefError, Result, Stage},
    half_edge::HalfEdgeMesh,
    mesh::Mesh,
    Pos,
};

/// Turns an open surface into a solid by sweeping it `depth` mm down the Z
/// axis. The result is the original surface, a flipped copy of it shifted
/// down, and vertical walls joining the two along the surface's outline.
pub fn extrude_down(surface: &Mesh, depth: f32) -> Result<Mesh> {
    if !(depth.is_finite() && depth > 0.0) {
        return Err(ReliefError::geometry(
            Stage::Extrusion,
            format!("extrusion depth must be positive, got {depth}"),
        ));
    }

    if surface.is_empty() {
        return Err(ReliefError::geometry(
            Stage::Extrusion,
            "surface has no faces",
        ));
    }

    let count = surface.vertex_count() as u32;
    let offset = Pos::new(0.0, 0.0, depth);
    let mut builder = MeshBuilder::with_capacity(count as usize * 2, surface.face_count() * 2);

    for &vertex in surface.vertices() {
        builder.add_vertex(vertex);
    }
    for &vertex in surface.vertices() {
        builder.add_vertex(vertex - offset);
    }

    for &face in surface.faces() {
        builder.add_face(face);
    }
    for &[a, b, c] in surface.faces() {
        builder.add_face([a + count, c + count, b + count]);
    }

    let half_edges = HalfEdgeMesh::build(surface);
    let mut walls = 0;
    for edge in half_edges.boundary() {
        let (u, v) = (edge.origin_vertex, edge.vertex);
        builder.add_quad([u + count, v + count, u, v]);
        walls += 1;
    }

    debug!("Extruded {} faces by {depth} mm with {walls} wall quads", surface.face_count());
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Mesh {
        let vertices = vec![
            Pos::new(0.0, 0.0, 1.0),
            Pos::new(1.0, 0.0, 1.0),
            Pos::new(0.0, 1.0, 1.5),
            Pos::new(1.0, 1.0, 1.0),
        ];
        Mesh::new(vertices, vec![[0, 1, 2], [2, 1, 3]])
    }

    #[test]
    fn extruded_square_is_closed() {
        let solid = extrude_down(&square(), 0.5).unwrap();

        assert_eq!(solid.vertex_count(), 8);
        assert_eq!(solid.face_count(), 4 + 4 * 2);
        assert!(solid.is_manifold());

        let (min, max) = solid.bounds();
        assert_eq!(min.z, 0.5);
        assert_eq!(max.z, 1.5);
    }

    #[test]
    fn walls_face_outward() {
        let solid = extrude_down(&square(), 0.5).unwrap();
        let center = Pos::new(0.5, 0.5, 0.0);
        for face in 4..solid.face_count() {
            let [a, b, c] = solid.triangle(face);
            let centroid = (a + b + c) / 3.0;
            let outward = (centroid - center).xy();
            assert!(solid.normal(face).xy().dot(&outward) > 0.0, "face {face}");
        }
    }

    #[test]
    fn bottom_faces_down() {
        let solid = extrude_down(&square(), 2.0).unwrap();
        assert!(solid.normal(2).z < 0.0);
        assert!(solid.normal(3).z < 0.0);
    }

    #[test]
    fn rejects_bad_depth() {
        assert!(extrude_down(&square(), 0.0).is_err());
        assert!(extrude_down(&square(), f32::NAN).is_err());
        assert!(extrude_down(&Mesh::default(), 1.0).is_err());
    }
}
