//! Error types shared by every stage of the export pipeline.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReliefError>;

#[derive(Debug, Error)]
pub enum ReliefError {
    /// The image or parameters were rejected before any geometry work.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A meshing stage produced nothing usable.
    #[error("{stage} failed: {details}")]
    GeometryFailure { stage: Stage, details: String },

    /// The destination could not be written.
    #[error("failed to write `{}`: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of a [`ReliefError`], for callers that only need to
/// branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    GeometryFailure,
    IoFailure,
}

/// The geometry stage a [`ReliefError::GeometryFailure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Triangulation,
    Decimation,
    Extrusion,
    Boolean,
    Finalize,
    Serialization,
}

impl ReliefError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn geometry(stage: Stage, details: impl Into<String>) -> Self {
        Self::GeometryFailure {
            stage,
            details: details.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::GeometryFailure { .. } => ErrorKind::GeometryFailure,
            Self::IoFailure { .. } => ErrorKind::IoFailure,
        }
    }

    /// The failing stage, for geometry failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::GeometryFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Triangulation => "triangulation",
            Stage::Decimation => "decimation",
            Stage::Extrusion => "extrusion",
            Stage::Boolean => "boolean union",
            Stage::Finalize => "mesh cleanup",
            Stage::Serialization => "serialization",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = ReliefError::geometry(Stage::Boolean, "empty result");
        assert_eq!(err.to_string(), "boolean union failed: empty result");
        assert_eq!(err.kind(), ErrorKind::GeometryFailure);
        assert_eq!(err.stage(), Some(Stage::Boolean));

        let err = ReliefError::io(
            "/nope/out.stl",
            io::Error::new(io::ErrorKind::NotFound, "no such directory"),
        );
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(err.to_string().contains("/nope/out.stl"));
        assert_eq!(err.stage(), None);
    }
}
