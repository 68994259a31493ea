//! Scene-side error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The light list already holds the maximum number of lights
    #[error("Light list is full ({max} lights)")]
    TooManyLights { max: usize },
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;
