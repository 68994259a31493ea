//! Error types for frame orchestration.

use penumbra_resources::ResourceError;
use penumbra_rhi::RhiError;
use penumbra_scene::{MaterialHandle, MeshHandle};
use thiserror::Error;

/// Errors raised by the renderer.
///
/// A stale surface is not an error; it surfaces as
/// [`FrameStatus::Skipped`](crate::orchestrator::FrameStatus::Skipped).
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU object creation or command failure.
    #[error("GPU error: {0}")]
    Rhi(#[from] RhiError),

    /// Invalid mesh, texture or shader blob.
    #[error("Asset error: {0}")]
    Resource(#[from] ResourceError),

    /// `begin_frame`/`end_frame` (or a recording call) issued in the wrong order.
    #[error("{called} called out of sequence (state: {state})")]
    OutOfSequence {
        called: &'static str,
        state: &'static str,
    },

    /// A fixed-capacity pool is full.
    #[error("{resource} capacity exceeded (max {max})")]
    CapacityExceeded { resource: &'static str, max: u32 },

    #[error("Unknown mesh handle {0:?}")]
    UnknownMesh(MeshHandle),

    #[error("Unknown material handle {0:?}")]
    UnknownMaterial(MaterialHandle),

    /// A failed `end_frame` left this slot's fence unsignaled; the renderer
    /// must be recreated.
    #[error("Frame slot {slot} abandoned by a failed end_frame")]
    SlotAbandoned { slot: usize },

    /// Presentation surface failure other than staleness.
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Result alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_sequence_message() {
        let err = RenderError::OutOfSequence {
            called: "end_frame",
            state: "idle",
        };
        assert_eq!(
            err.to_string(),
            "end_frame called out of sequence (state: idle)"
        );
    }

    #[test]
    fn test_rhi_error_converts() {
        let err: RenderError = RhiError::NoSuitableGpu.into();
        assert!(matches!(err, RenderError::Rhi(RhiError::NoSuitableGpu)));
    }
}
