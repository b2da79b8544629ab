//! Error types for seqgraph

use thiserror::Error;

use crate::registry::ContextId;

/// Result type alias using seqgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for graph construction, planning and device binding
///
/// Client programming errors (unbalanced layer scopes, registration after
/// build, nested regress regions) are not represented here: they panic.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(String),

    #[error("BLAS error: {0}")]
    Blas(String),

    #[error("Graph validation failed: {0}")]
    Validation(String),

    #[error("Graph is not built")]
    NotBuilt,

    #[error("Context not found: {0}")]
    ContextNotFound(ContextId),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object type mismatch for {name}: stored {stored}, requested {requested}")]
    ObjectTypeMismatch {
        name: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Optional From impls for cudarc error types (enabled by `cuda-errors` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "cuda-errors")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Device(e.to_string())
    }
}

#[cfg(feature = "cuda-errors")]
impl From<cudarc::cublas::result::CublasError> for Error {
    fn from(e: cudarc::cublas::result::CublasError) -> Self {
        Self::Blas(format!("{e:?}"))
    }
}
