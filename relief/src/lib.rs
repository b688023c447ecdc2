//! Turns grayscale images into printable relief solids. The [`filter`] chain
//! cleans up the image, [`height_field`] maps it to elevations and [`synth`]
//! builds a mesh from those, which [`export`] finalizes and writes as STL.

use nalgebra::Vector3;

pub mod boolean;
pub mod builder;
pub mod decimate;
pub mod delaunay;
pub mod error;
pub mod export;
pub mod extrude;
pub mod filter;
pub mod finalize;
pub mod half_edge;
pub mod height_field;
pub mod lattice;
pub mod mesh;
pub mod operation;
pub mod preview;
pub mod synth;

pub type Pos = Vector3<f32>;

pub use error::{ErrorKind, ReliefError, Result, Stage};
pub use export::{export, ExportReport, ExportRequest};
pub use height_field::HeightField;
pub use mesh::Mesh;
pub use synth::Strategy;
