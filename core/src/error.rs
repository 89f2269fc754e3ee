//! Error types shared by the library half of the workspace.
//!
//! Experiment binaries wrap these in `anyhow` with context; library code
//! returns them directly so callers can match on the failure kind.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OcmlError>;

#[derive(Debug, Error)]
pub enum OcmlError {
    #[error("invalid domain [{min}, {max}] at resolution {resolution}")]
    InvalidDomain {
        min: f64,
        max: f64,
        resolution: usize,
    },

    #[error("unknown model kind: {0}")]
    UnknownModelKind(String),

    #[error("scoring failed: {0}")]
    ScoringFailure(String),

    #[error("model has not been fitted")]
    NotFitted,

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("subplot slot {slot} out of range for a figure with {panels} panels")]
    InvalidSlot { slot: usize, panels: usize },

    #[error("render error: {0}")]
    Render(String),

    #[error("{context}: {}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OcmlError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
