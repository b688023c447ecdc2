//! Reading and writing triangle-soup solids.

use nalgebra::Vector3;

pub mod stl;

pub use stl::{encode, parse, write_ascii, write_binary};

/// An indexed triangle mesh as stored in or loaded from a file.
#[derive(Debug, Default, Clone)]
pub struct Mesh {
    pub verts: Vec<Vector3<f32>>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Facet normal of a face, derived from its winding with the right-hand
    /// rule. Degenerate faces get a zero normal.
    pub fn face_normal(&self, face: &[u32; 3]) -> Vector3<f32> {
        let [a, b, c] = face.map(|x| self.verts[x as usize]);
        (b - a).cross(&(c - a)).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
    }
}
