//! Frame sequencing.
//!
//! [`FrameOrchestrator`] owns the begin/draw/end contract and the resize
//! policy; all GPU work goes through a [`FrameBackend`]. This keeps the
//! sequencing rules testable with a recording backend and no device.
//!
//! # Frame loop
//!
//! ```text
//! begin_frame:  guard idle → clear draws → wait slot fence → rebuild if pending
//!               → acquire (stale: rebuild, Skipped) → reset slot → Recording
//! draw_model:   push (mesh, transform)
//! end_frame:    guard recording → plan → write uniforms → per batch: record, submit
//!               → present (stale: rebuild, suboptimal: defer) → next slot → Idle
//! ```
//!
//! A rebuild against a zero-sized surface changes nothing and stays pending;
//! frames are skipped until the surface has an area again.

use glam::Mat4;
use tracing::{debug, info, warn};

use penumbra_core::config::FRAMES_IN_FLIGHT;
use penumbra_scene::{DrawCall, LightList, MeshHandle, SceneUniforms};

use crate::context::{AcquireOutcome, PresentOutcome};
use crate::error::{RenderError, RenderResult};
use crate::frame_graph::{FramePlan, PassId, SemaphoreRef, SubmissionBatch};

/// Whether a frame was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Recording; queue draws and call `end_frame`.
    Ready,
    /// Nothing to draw this time (stale or zero-sized surface). Do not call
    /// `end_frame`.
    Skipped,
}

/// Result of [`FrameBackend::rebuild_surface`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceRebuild {
    Rebuilt,
    /// The surface has no area; the previous targets were left in place.
    ZeroSized,
}

/// Where the orchestrator is in the begin/end cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording { image_index: u32 },
}

impl FramePhase {
    pub fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Recording { .. } => "recording",
        }
    }
}

/// Everything a pass needs to record itself for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    pub slot: usize,
    pub image_index: u32,
    pub draws: &'a [DrawCall],
    pub scene: &'a SceneUniforms,
    pub lights: &'a LightList,
}

/// GPU side of the frame loop.
///
/// Implementations own every stage, image and synchronization object; the
/// orchestrator only decides when each step happens.
pub trait FrameBackend {
    /// Blocks until the last submission that used `slot` has finished.
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquires the next presentable image, signaling the slot's
    /// image-acquired semaphore.
    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;

    /// Unsignals the slot's fence and resets its command buffers. Only called
    /// after `wait_for_slot` and a successful acquire.
    fn reset_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Writes this slot's uniform buffers.
    fn write_frame_uniforms(
        &mut self,
        slot: usize,
        scene: &SceneUniforms,
        lights: &LightList,
    ) -> RenderResult<()>;

    /// Records `pass` into its command buffer for `frame.slot`.
    fn record_pass(&mut self, frame: &FrameContext<'_>, pass: PassId) -> RenderResult<()>;

    /// Submits one batch in a single queue call.
    fn submit_batch(&mut self, slot: usize, batch: &SubmissionBatch) -> RenderResult<()>;

    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
        wait: SemaphoreRef,
    ) -> RenderResult<PresentOutcome>;

    /// Waits for the device, rebuilds the swapchain and every
    /// surface-derived resource, and repoints descriptor sets.
    ///
    /// `extent` is the requested window size, or `None` to keep the current.
    /// Returns [`SurfaceRebuild::ZeroSized`] without touching anything when
    /// the surface currently has no area.
    fn rebuild_surface(&mut self, extent: Option<(u32, u32)>) -> RenderResult<SurfaceRebuild>;

    /// Whether `mesh` refers to an uploaded mesh.
    fn contains_mesh(&self, mesh: MeshHandle) -> bool;
}

/// Drives one frame at a time through a [`FrameBackend`].
pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    phase: FramePhase,
    slot: usize,
    draws: Vec<DrawCall>,
    /// Set by a suboptimal surface or a resize; handled at the next
    /// `begin_frame`.
    rebuild_pending: bool,
    pending_extent: Option<(u32, u32)>,
    /// The window is zero-sized; frames are skipped until it grows.
    minimized: bool,
    /// Slot whose fence was reset by a frame that then failed before its
    /// fenced submission. Waiting on it would never return.
    abandoned: Option<usize>,
    frames_submitted: u64,
    rebuilds: u64,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            phase: FramePhase::Idle,
            slot: 0,
            draws: Vec::new(),
            rebuild_pending: false,
            pending_extent: None,
            minimized: false,
            abandoned: None,
            frames_submitted: 0,
            rebuilds: 0,
        }
    }

    /// Starts a frame.
    ///
    /// Blocks on the current slot's fence. A stale surface triggers a full
    /// rebuild and returns [`FrameStatus::Skipped`].
    ///
    /// # Errors
    ///
    /// [`RenderError::OutOfSequence`] if a frame is already recording,
    /// [`RenderError::SlotAbandoned`] after a failed `end_frame`, or any
    /// backend failure.
    pub fn begin_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.phase != FramePhase::Idle {
            return Err(RenderError::OutOfSequence {
                called: "begin_frame",
                state: self.phase.name(),
            });
        }
        if let Some(slot) = self.abandoned {
            return Err(RenderError::SlotAbandoned { slot });
        }

        self.draws.clear();
        if self.minimized {
            return Ok(FrameStatus::Skipped);
        }

        self.backend.wait_for_slot(self.slot)?;

        if self.rebuild_pending && self.rebuild()? == SurfaceRebuild::ZeroSized {
            return Ok(FrameStatus::Skipped);
        }

        let image_index = match self.backend.acquire_image(self.slot)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                // The semaphore is signaled, so this frame must still run.
                warn!("Surface suboptimal at acquire; rebuilding after this frame");
                self.rebuild_pending = true;
                index
            }
            AcquireOutcome::Stale => {
                self.rebuild()?;
                return Ok(FrameStatus::Skipped);
            }
        };

        self.backend.reset_slot(self.slot)?;
        self.phase = FramePhase::Recording { image_index };
        Ok(FrameStatus::Ready)
    }

    /// Queues a draw for the current frame. No GPU work happens here.
    ///
    /// # Errors
    ///
    /// [`RenderError::OutOfSequence`] outside a frame, or
    /// [`RenderError::UnknownMesh`] for a handle the backend never issued.
    pub fn draw_model(&mut self, mesh: MeshHandle, transform: Mat4) -> RenderResult<()> {
        if self.phase == FramePhase::Idle {
            return Err(RenderError::OutOfSequence {
                called: "draw_model",
                state: self.phase.name(),
            });
        }
        if !self.backend.contains_mesh(mesh) {
            return Err(RenderError::UnknownMesh(mesh));
        }
        self.draws.push(DrawCall::new(mesh, transform));
        Ok(())
    }

    /// Records, submits and presents the frame.
    ///
    /// `lights` is read during this call only and must not change while it
    /// runs.
    ///
    /// # Errors
    ///
    /// [`RenderError::OutOfSequence`] without a preceding successful
    /// `begin_frame`; nothing is submitted in that case. A failure before
    /// the fenced submission abandons the slot, and every later
    /// `begin_frame` returns [`RenderError::SlotAbandoned`].
    pub fn end_frame(&mut self, scene: &SceneUniforms, lights: &LightList) -> RenderResult<()> {
        let FramePhase::Recording { image_index } = self.phase else {
            return Err(RenderError::OutOfSequence {
                called: "end_frame",
                state: self.phase.name(),
            });
        };
        self.phase = FramePhase::Idle;

        let slot = self.slot;
        let plan = FramePlan::build(lights.len());
        if let Err(e) = self.submit_frame(&plan, image_index, scene, lights) {
            warn!("Frame on slot {} failed before its fenced submission", slot);
            self.abandoned = Some(slot);
            return Err(e);
        }

        let outcome = self
            .backend
            .present(slot, image_index, plan.present_wait())?;
        self.slot = (slot + 1) % FRAMES_IN_FLIGHT;
        self.frames_submitted += 1;

        match outcome {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => self.rebuild_pending = true,
            // Minimized mid-frame: wait for the window to come back.
            PresentOutcome::Stale if self.minimized => self.rebuild_pending = true,
            PresentOutcome::Stale => {
                self.rebuild()?;
            }
        }
        Ok(())
    }

    fn submit_frame(
        &mut self,
        plan: &FramePlan,
        image_index: u32,
        scene: &SceneUniforms,
        lights: &LightList,
    ) -> RenderResult<()> {
        let slot = self.slot;
        self.backend.write_frame_uniforms(slot, scene, lights)?;

        let frame = FrameContext {
            slot,
            image_index,
            draws: &self.draws,
            scene,
            lights,
        };
        for batch in plan.batches() {
            for pass in batch.passes() {
                self.backend.record_pass(&frame, pass)?;
            }
            self.backend.submit_batch(slot, batch)?;
        }
        Ok(())
    }

    /// Records a new window size. The rebuild happens at the next
    /// `begin_frame`; a zero size pauses rendering instead.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Surface minimized; skipping frames");
            self.minimized = true;
            return;
        }
        self.minimized = false;
        self.pending_extent = Some((width, height));
        self.rebuild_pending = true;
    }

    /// Rebuilds every surface-derived resource now.
    ///
    /// A zero-sized surface leaves the rebuild pending.
    ///
    /// # Errors
    ///
    /// [`RenderError::OutOfSequence`] while a frame is recording.
    pub fn rebuild(&mut self) -> RenderResult<SurfaceRebuild> {
        if self.phase != FramePhase::Idle {
            return Err(RenderError::OutOfSequence {
                called: "rebuild",
                state: self.phase.name(),
            });
        }
        let extent = self.pending_extent.take();
        let outcome = self.backend.rebuild_surface(extent)?;
        match outcome {
            SurfaceRebuild::Rebuilt => {
                self.rebuild_pending = false;
                self.rebuilds += 1;
                info!("Surface resources rebuilt ({} so far)", self.rebuilds);
            }
            SurfaceRebuild::ZeroSized => {
                debug!("Surface has no area; rebuild deferred");
                self.pending_extent = extent;
                self.rebuild_pending = true;
            }
        }
        Ok(outcome)
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// The frame slot the next (or current) frame uses.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Draws queued since the last `begin_frame`.
    #[inline]
    pub fn queued_draws(&self) -> &[DrawCall] {
        &self.draws
    }

    #[inline]
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    #[inline]
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that accepts everything and counts calls.
    #[derive(Default)]
    struct NullBackend {
        acquires: usize,
        submits: usize,
        rebuilds: usize,
    }

    impl FrameBackend for NullBackend {
        fn wait_for_slot(&mut self, _slot: usize) -> RenderResult<()> {
            Ok(())
        }
        fn acquire_image(&mut self, _slot: usize) -> RenderResult<AcquireOutcome> {
            self.acquires += 1;
            Ok(AcquireOutcome::Acquired(0))
        }
        fn reset_slot(&mut self, _slot: usize) -> RenderResult<()> {
            Ok(())
        }
        fn write_frame_uniforms(
            &mut self,
            _slot: usize,
            _scene: &SceneUniforms,
            _lights: &LightList,
        ) -> RenderResult<()> {
            Ok(())
        }
        fn record_pass(&mut self, _frame: &FrameContext<'_>, _pass: PassId) -> RenderResult<()> {
            Ok(())
        }
        fn submit_batch(&mut self, _slot: usize, _batch: &SubmissionBatch) -> RenderResult<()> {
            self.submits += 1;
            Ok(())
        }
        fn present(
            &mut self,
            _slot: usize,
            _image_index: u32,
            _wait: SemaphoreRef,
        ) -> RenderResult<PresentOutcome> {
            Ok(PresentOutcome::Presented)
        }
        fn rebuild_surface(&mut self, _extent: Option<(u32, u32)>) -> RenderResult<SurfaceRebuild> {
            self.rebuilds += 1;
            Ok(SurfaceRebuild::Rebuilt)
        }
        fn contains_mesh(&self, mesh: MeshHandle) -> bool {
            mesh.index() < 2
        }
    }

    #[test]
    fn test_slot_cycles_through_frames_in_flight() {
        let mut frames = FrameOrchestrator::new(NullBackend::default());
        let scene = SceneUniforms::default();
        let lights = LightList::new();
        for expected in [0, 1, 0, 1] {
            assert_eq!(frames.slot(), expected);
            assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Ready);
            frames.end_frame(&scene, &lights).unwrap();
        }
        assert_eq!(frames.frames_submitted(), 4);
    }

    #[test]
    fn test_draw_outside_frame_rejected() {
        let mut frames = FrameOrchestrator::new(NullBackend::default());
        assert!(matches!(
            frames.draw_model(MeshHandle::new(0), Mat4::IDENTITY),
            Err(RenderError::OutOfSequence { called: "draw_model", .. })
        ));
    }

    #[test]
    fn test_unknown_mesh_rejected() {
        let mut frames = FrameOrchestrator::new(NullBackend::default());
        frames.begin_frame().unwrap();
        assert!(matches!(
            frames.draw_model(MeshHandle::new(7), Mat4::IDENTITY),
            Err(RenderError::UnknownMesh(_))
        ));
        assert!(frames.queued_draws().is_empty());
    }

    #[test]
    fn test_minimized_surface_skips_without_touching_backend() {
        let mut frames = FrameOrchestrator::new(NullBackend::default());
        frames.request_resize(0, 0);
        assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.backend().acquires, 0);

        frames.request_resize(800, 600);
        assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Ready);
        assert_eq!(frames.backend().rebuilds, 1);
    }

    #[test]
    fn test_rebuild_rejected_while_recording() {
        let mut frames = FrameOrchestrator::new(NullBackend::default());
        frames.begin_frame().unwrap();
        assert!(matches!(
            frames.rebuild(),
            Err(RenderError::OutOfSequence { called: "rebuild", .. })
        ));
    }
}
