//! Error types shared by the penumbra crates.

use thiserror::Error;

/// Error type for configuration and process-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value could not be parsed
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
