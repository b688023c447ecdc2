use nalgebra::Vector3;

use crate::mesh::Mesh;

pub struct MeshBuilder {
    vertices: Vec<Vector3<f32>>,
    faces: Vec<[u32; 3]>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    pub fn with_capacity(vertices: usize, faces: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            faces: Vec::with_capacity(faces),
        }
    }

    pub fn add_vertex(&mut self, vertex: Vector3<f32>) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    pub fn add_face(&mut self, face: [u32; 3]) {
        self.faces.push(face);
    }

    /// Adds two triangles for the quad `[a, b, c, d]` where `a`, `b` and `c`
    /// are counter-clockwise and `d` sits opposite `a`.
    pub fn add_quad(&mut self, quad: [u32; 4]) {
        self.add_face([quad[0], quad[1], quad[2]]);
        self.add_face([quad[2], quad[1], quad[3]]);
    }

    pub fn build(self) -> Mesh {
        Mesh::new(self.vertices, self.faces)
    }
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshBuilder {
    /// Adds an axis aligned box with outward facing triangles.
    pub fn add_box(&mut self, min: Vector3<f32>, max: Vector3<f32>) {
        let corner = |i: u32| {
            Vector3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        };
        let base = self.vertices.len() as u32;
        for i in 0..8 {
            self.add_vertex(corner(i));
        }

        let v = |i: u32| base + i;
        self.add_quad([v(0), v(2), v(1), v(3)]); // bottom
        self.add_quad([v(4), v(5), v(6), v(7)]); // top
        self.add_quad([v(0), v(1), v(4), v(5)]); // front
        self.add_quad([v(3), v(2), v(7), v(6)]); // back
        self.add_quad([v(2), v(0), v(6), v(4)]); // left
        self.add_quad([v(1), v(3), v(5), v(7)]); // right
    }
}
