use std::collections::HashMap;

use crate::{
    error::{ReliefError, Result, Stage},
    Pos,
};

/// A mesh made of vertices (in mm) and triangular faces. Faces are wound
/// counter-clockwise when seen from outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Pos>,
    faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Creates a new mesh from the given vertices and faces.
    pub fn new(vertices: Vec<Pos>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    pub fn vertices(&self) -> &[Pos] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn into_parts(self) -> (Vec<Pos>, Vec<[u32; 3]>) {
        (self.vertices, self.faces)
    }

    pub fn face(&self, index: usize) -> &[u32; 3] {
        &self.faces[index]
    }

    /// The three corners of a face.
    pub fn triangle(&self, index: usize) -> [Pos; 3] {
        self.faces[index].map(|x| self.vertices[x as usize])
    }

    pub fn normal(&self, index: usize) -> Pos {
        let (v, f) = (self.vertices(), self.face(index));
        let edge1 = v[f[2] as usize] - v[f[1] as usize];
        let edge2 = v[f[0] as usize] - v[f[1] as usize];
        edge1.cross(&edge2).normalize()
    }

    /// Twice the area of a face.
    pub fn double_area(&self, index: usize) -> f32 {
        let [a, b, c] = self.triangle(index);
        (b - a).cross(&(c - a)).norm()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Appends another mesh, offsetting its indices.
    pub fn append(&mut self, other: &Mesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        (self.faces).extend(other.faces.iter().map(|f| f.map(|x| x + offset)));
    }

    /// True when every edge is shared by exactly two faces.
    pub fn is_manifold(&self) -> bool {
        edge_use_counts(&self.faces).values().all(|&count| count == 2)
    }

    /// Number of edges used by only one face.
    pub fn boundary_edge_count(&self) -> usize {
        let counts = edge_use_counts(&self.faces);
        counts.values().filter(|&&count| count == 1).count()
    }

    /// Get the minimum and maximum of each component of every vertex in the
    /// model. These points define the bounding box of the model.
    pub fn bounds(&self) -> (Pos, Pos) {
        vertex_bounds(&self.vertices)
    }

    /// Checks that every face references an existing vertex and every vertex
    /// is finite.
    pub fn validate(&self) -> Result<()> {
        let count = self.vertices.len();
        if let Some((idx, face)) = (self.faces.iter().enumerate())
            .find(|(_, face)| face.iter().any(|&x| x as usize >= count))
        {
            return Err(ReliefError::geometry(
                Stage::Finalize,
                format!("face {idx} {face:?} references a vertex outside 0..{count}"),
            ));
        }

        if let Some(idx) = self.vertices.iter().position(|v| !v.iter().all(|x| x.is_finite())) {
            return Err(ReliefError::geometry(
                Stage::Finalize,
                format!("vertex {idx} has a non-finite coordinate"),
            ));
        }

        Ok(())
    }

    pub fn to_format(&self) -> mesh_format::Mesh {
        mesh_format::Mesh {
            verts: self.vertices.clone(),
            faces: self.faces.clone(),
        }
    }
}

impl From<mesh_format::Mesh> for Mesh {
    fn from(mesh: mesh_format::Mesh) -> Self {
        Self::new(mesh.verts, mesh.faces)
    }
}

fn edge_use_counts(faces: &[[u32; 3]]) -> HashMap<(u32, u32), u32> {
    let mut edges = HashMap::<_, u32>::new();
    for [a, b, c] in faces {
        for (a, b) in [(a, b), (b, c), (c, a)] {
            *edges.entry((*a.min(b), *a.max(b))).or_default() += 1;
        }
    }
    edges
}

/// Get the minimum and maximum of each component of every vertex.
pub fn vertex_bounds(vertices: &[Pos]) -> (Pos, Pos) {
    vertices.iter().fold(
        (Pos::repeat(f32::MAX), Pos::repeat(f32::MIN)),
        |(min, max), v| (min.inf(v), max.sup(v)),
    )
}
