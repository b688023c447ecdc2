use std::io::{Read, Seek, Write};

use anyhow::{Context, Result};
use common::format::Format;
use nalgebra::Vector3;
use tracing::debug;

use crate::Mesh;

/// Serializes `mesh` into an in-memory STL document.
pub fn encode(mesh: &Mesh, format: Format) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        Format::Binary => write_binary(&mut out, mesh)?,
        Format::Ascii => write_ascii(&mut out, mesh, "relief")?,
    }

    debug!(
        "Encoded {} triangles as {} ({} bytes)",
        mesh.faces.len(),
        format.name(),
        out.len()
    );
    Ok(out)
}

/// Loads a binary or ASCII STL document.
pub fn parse<T: Read + Seek>(reader: &mut T) -> Result<Mesh> {
    let indexed = stl_io::read_stl(reader).context("Malformed STL document")?;

    let verts = (indexed.vertices.iter())
        .map(|v| Vector3::new(v[0], v[1], v[2]))
        .collect();
    let faces = (indexed.faces.iter())
        .map(|f| f.vertices.map(|x| x as u32))
        .collect();

    Ok(Mesh { verts, faces })
}

pub use ascii::write as write_ascii;
pub use binary::write as write_binary;

/// Binary STL through stl_io: an empty 80 byte header, the triangle count,
/// then one 50 byte record per face with its normal recomputed from the
/// winding.
mod binary {
    use stl_io::{Triangle, Vector};

    use super::*;

    pub fn write<T: Write>(writer: &mut T, mesh: &Mesh) -> Result<()> {
        let vec = |v: Vector3<f32>| Vector::new([v.x, v.y, v.z]);
        let triangles = mesh.faces.iter().map(|face| Triangle {
            normal: vec(mesh.face_normal(face)),
            vertices: face.map(|x| vec(mesh.verts[x as usize])),
        });

        stl_io::write_stl(writer, triangles)?;
        Ok(())
    }
}

/// ASCII STL, one `facet` block per face. Floats use `{:e}`, which prints
/// the shortest form that reads back to the same `f32`.
mod ascii {
    use super::*;

    pub fn write<T: Write>(writer: &mut T, mesh: &Mesh, name: &str) -> Result<()> {
        writeln!(writer, "solid {name}")?;
        for face in mesh.faces.iter() {
            let normal = mesh.face_normal(face);
            writeln!(
                writer,
                "facet normal {:e} {:e} {:e}",
                normal.x, normal.y, normal.z
            )?;
            writeln!(writer, "    outer loop")?;
            for vertex in face.map(|x| mesh.verts[x as usize]) {
                writeln!(
                    writer,
                    "        vertex {:e} {:e} {:e}",
                    vertex.x, vertex.y, vertex.z
                )?;
            }
            writeln!(writer, "    endloop")?;
            writeln!(writer, "endfacet")?;
        }
        writeln!(writer, "endsolid {name}")?;
        Ok(())
    }
}
