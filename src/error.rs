//! Error types for the radiosity baker.

use thiserror::Error;

/// Errors produced while preparing or running a GI bake.
#[derive(Error, Debug)]
pub enum RadiosityError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to initialize GPU backend: {0}")]
    InitializationFailed(String),
    #[error("unsupported configuration: {0}")]
    ConfigurationUnsupported(String),
    #[error("atlas readback failed: {0}")]
    ReadbackFailed(String),
    #[error("scene rendering failed: {0}")]
    RenderFailed(String),
    #[error("hemicube export failed: {0}")]
    ExportFailed(String),
}

pub type Result<T> = std::result::Result<T, RadiosityError>;
