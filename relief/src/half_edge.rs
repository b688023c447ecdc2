use std::collections::HashMap;

use crate::mesh::Mesh;

/// Directed edge connectivity for a triangle mesh.
#[derive(Clone)]
pub struct HalfEdgeMesh {
    half_edges: Vec<HalfEdge>,
}

#[derive(Debug, Clone)]
pub struct HalfEdge {
    pub origin_vertex: u32,
    pub vertex: u32,
    pub face: u32,

    pub next: u32,
    pub prev: u32,
    pub twin: Option<u32>,
}

impl HalfEdgeMesh {
    pub fn build(mesh: &Mesh) -> Self {
        let mut half_edges = Vec::with_capacity(mesh.face_count() * 3);
        let mut edge_map = HashMap::new();

        for (face_idx, face) in mesh.faces().iter().enumerate() {
            let first_edge = half_edges.len() as u32;
            for i in 0..3 {
                let next = first_edge + (i as u32 + 1) % 3;
                let prev = first_edge + (i as u32 + 2) % 3;

                half_edges.push(HalfEdge {
                    origin_vertex: face[i],
                    vertex: face[(i + 1) % 3],
                    face: face_idx as u32,

                    next,
                    prev,
                    twin: None,
                });

                edge_map.insert((face[i], face[(i + 1) % 3]), first_edge + i as u32);
            }
        }

        for edge in half_edges.iter_mut() {
            edge.twin = edge_map.get(&(edge.vertex, edge.origin_vertex)).copied();
        }

        Self { half_edges }
    }

    pub fn half_edges(&self) -> &[HalfEdge] {
        &self.half_edges
    }

    pub fn half_edge_count(&self) -> usize {
        self.half_edges.len()
    }

    pub fn get_edge(&self, idx: u32) -> &HalfEdge {
        &self.half_edges[idx as usize]
    }

    /// Half edges without a twin, in the direction their face walks them.
    /// For an open surface these trace its outline.
    pub fn boundary(&self) -> impl Iterator<Item = &HalfEdge> + '_ {
        self.half_edges.iter().filter(|edge| edge.twin.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mesh::tests::cube, Pos};

    #[test]
    fn closed_mesh_has_no_boundary() {
        let mesh = HalfEdgeMesh::build(&cube());
        assert_eq!(mesh.half_edge_count(), 36);
        assert_eq!(mesh.boundary().count(), 0);

        for (idx, edge) in mesh.half_edges().iter().enumerate() {
            let twin = mesh.get_edge(edge.twin.unwrap());
            assert_eq!(twin.twin, Some(idx as u32));
            assert_eq!(mesh.get_edge(edge.next).origin_vertex, edge.vertex);
        }
    }

    #[test]
    fn square_boundary_follows_winding() {
        let vertices = vec![
            Pos::new(0.0, 0.0, 0.0),
            Pos::new(1.0, 0.0, 0.0),
            Pos::new(0.0, 1.0, 0.0),
            Pos::new(1.0, 1.0, 0.0),
        ];
        let square = Mesh::new(vertices, vec![[0, 1, 2], [2, 1, 3]]);
        let mesh = HalfEdgeMesh::build(&square);

        let mut boundary = mesh
            .boundary()
            .map(|x| (x.origin_vertex, x.vertex))
            .collect::<Vec<_>>();
        boundary.sort();
        assert_eq!(boundary, vec![(0, 1), (1, 3), (2, 0), (3, 2)]);
    }
}
