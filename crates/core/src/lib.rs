//! Core utilities for the penumbra renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Runtime configuration and the fixed capacity constants

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameStats, Timer};
