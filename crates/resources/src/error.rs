//! Error types for asset buffers.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for mesh, texture and shader blobs.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Vertex or index arrays are inconsistent.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// Pixel buffer length does not match its dimensions.
    #[error("Invalid texture {width}x{height}: expected {expected} bytes, got {actual}")]
    InvalidTexture {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// A shader blob is not SPIR-V.
    #[error("Invalid shader '{name}': {reason}")]
    InvalidShader { name: String, reason: String },

    /// No blob exists for a requested shader file.
    #[error("Shader not found: {0}")]
    MissingShader(PathBuf),

    /// IO error while reading a blob.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
