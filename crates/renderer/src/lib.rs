//! Deferred frame orchestration.
//!
//! This crate turns queued draws into presented frames:
//! - Frame sequencing and the resize policy ([`FrameOrchestrator`])
//! - The fixed pass graph and its semaphore chain ([`frame_graph`])
//! - Render stages over attachment collections
//! - Descriptor binding with host-checked capacities
//! - Directional and point-light cube shadows, image-based lighting, bloom
//!
//! [`Renderer`] is the orchestrator over the Vulkan backend.

pub mod assets;
pub mod attachments;
pub mod bindings;
pub mod context;
pub mod deferred;
pub mod environment;
mod error;
pub mod frame;
pub mod frame_graph;
pub mod orchestrator;
pub mod pipelines;
pub mod render_stage;
pub mod shadow;
pub mod surface_targets;
pub mod texture;
pub mod ubo;

pub use bindings::CapacityCounter;
pub use context::{AcquireOutcome, PresentOutcome};
pub use deferred::{DeferredBackend, Renderer};
pub use error::{RenderError, RenderResult};
pub use frame_graph::{FramePlan, PassId, SemaphoreRef, SubmissionBatch};
pub use orchestrator::{
    FrameBackend, FrameContext, FrameOrchestrator, FramePhase, FrameStatus, SurfaceRebuild,
};
pub use surface_targets::{StageSignature, surface_signature, verify_signature};
