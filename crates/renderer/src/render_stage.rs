//! Render stages: a pass, its framebuffers, and per-slot command buffers.
//!
//! Each stage records into one command buffer per frame slot and signals
//! one semaphore per frame slot when its submission completes. Recording
//! order is tracked per command buffer:
//!
//! ```text
//! Initial ─begin_commands─► Recording ─begin_pass─► InPass
//!    ▲                          ▲                     │
//!    │                          └──────end_pass───────┘
//!  reset                        │
//!    │                    end_commands
//!    └─────────────────── Executable ◄┘
//! ```
//!
//! Calls out of this order return [`RenderError::OutOfSequence`] without
//! touching Vulkan.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error};

use penumbra_core::config::FRAMES_IN_FLIGHT;
use penumbra_rhi::command::{CommandBuffer, CommandPool};
use penumbra_rhi::device::Device;
use penumbra_rhi::framebuffer::Framebuffer;
use penumbra_rhi::render_pass::RenderPass;
use penumbra_rhi::sync::Semaphore;
use penumbra_rhi::{RhiError, RhiResult};

use crate::attachments::AttachmentCollection;
use crate::error::{RenderError, RenderResult};

/// How many framebuffers a stage has and what selects one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTargets {
    /// One per swapchain image, selected by the acquired image index.
    PerSwapchainImage,
    /// One per frame slot, so a slot never overwrites images the other slot
    /// is still sampling.
    PerFrameSlot,
    /// One per cubemap face.
    PerCubeFace,
    /// A single target rendered once at startup.
    Single,
}

impl RenderTargets {
    /// Expected number of targets.
    pub fn count(self, swapchain_images: usize) -> usize {
        match self {
            RenderTargets::PerSwapchainImage => swapchain_images,
            RenderTargets::PerFrameSlot => FRAMES_IN_FLIGHT,
            RenderTargets::PerCubeFace => 6,
            RenderTargets::Single => 1,
        }
    }
}

/// Recording state of one command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Initial,
    Recording,
    InPass,
    Executable,
}

impl RecordState {
    pub fn name(self) -> &'static str {
        match self {
            RecordState::Initial => "initial",
            RecordState::Recording => "recording",
            RecordState::InPass => "in pass",
            RecordState::Executable => "executable",
        }
    }

    /// The state after `op`, or `None` if `op` is not allowed now.
    pub fn advance(self, op: RecordOp) -> Option<RecordState> {
        match (self, op) {
            (_, RecordOp::Reset) => Some(RecordState::Initial),
            (RecordState::Initial, RecordOp::BeginCommands) => Some(RecordState::Recording),
            (RecordState::Recording, RecordOp::BeginPass) => Some(RecordState::InPass),
            (RecordState::InPass, RecordOp::EndPass) => Some(RecordState::Recording),
            (RecordState::Recording, RecordOp::EndCommands) => Some(RecordState::Executable),
            (RecordState::Executable, RecordOp::Submit) => Some(RecordState::Executable),
            _ => None,
        }
    }
}

/// Operations on a stage's command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOp {
    Reset,
    BeginCommands,
    BeginPass,
    EndPass,
    EndCommands,
    Submit,
}

impl RecordOp {
    fn name(self) -> &'static str {
        match self {
            RecordOp::Reset => "reset",
            RecordOp::BeginCommands => "begin_commands",
            RecordOp::BeginPass => "begin_pass",
            RecordOp::EndPass => "end_pass",
            RecordOp::EndCommands => "end_commands",
            RecordOp::Submit => "submit_info",
        }
    }
}

/// Owned arrays behind one `VkSubmitInfo`.
pub struct StageSubmission {
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    command_buffers: [vk::CommandBuffer; 1],
    signal_semaphores: Vec<vk::Semaphore>,
}

impl StageSubmission {
    pub fn info(&self) -> vk::SubmitInfo<'_> {
        vk::SubmitInfo::default()
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&self.command_buffers)
            .signal_semaphores(&self.signal_semaphores)
    }

    pub fn signal(&self) -> Option<vk::Semaphore> {
        self.signal_semaphores.first().copied()
    }
}

/// A render pass with its framebuffers and per-slot recording resources.
///
/// Fields drop in declaration order: framebuffers, then the attachments
/// they view, then the pass. Command buffers return to the pool in `Drop`.
pub struct RenderStage {
    name: &'static str,
    framebuffers: Vec<Framebuffer>,
    attachments: Vec<AttachmentCollection>,
    signals: Vec<Semaphore>,
    command_buffers: Vec<CommandBuffer>,
    states: Vec<RecordState>,
    targets: RenderTargets,
    pass: RenderPass,
    pool: Arc<CommandPool>,
}

impl RenderStage {
    /// Creates a stage with one framebuffer per attachment collection.
    ///
    /// # Errors
    ///
    /// Returns an error if a collection does not match the pass, if the
    /// number of collections does not match `targets`, or if any Vulkan
    /// object cannot be created.
    pub fn new(
        device: &Arc<Device>,
        pool: &Arc<CommandPool>,
        pass: RenderPass,
        targets: RenderTargets,
        attachments: Vec<AttachmentCollection>,
    ) -> RhiResult<Self> {
        let name = pass.name();
        if targets != RenderTargets::PerSwapchainImage
            && attachments.len() != targets.count(attachments.len())
        {
            return Err(RhiError::RenderPassError(format!(
                "{}: {:?} expects {} target(s), got {}",
                name,
                targets,
                targets.count(0),
                attachments.len()
            )));
        }
        if attachments.is_empty() {
            return Err(RhiError::RenderPassError(format!("{}: no targets", name)));
        }

        let framebuffers = attachments
            .iter()
            .map(|collection| {
                if collection.formats() != pass_formats(&pass).as_slice() {
                    return Err(RhiError::RenderPassError(format!(
                        "{}: attachment formats {:?} do not match pass {:?}",
                        name,
                        collection.formats(),
                        pass_formats(&pass)
                    )));
                }
                Framebuffer::new(
                    device.clone(),
                    &pass,
                    &collection.framebuffer_views(),
                    collection.extent(),
                    collection.shape().layers(),
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let command_buffers = pool.allocate(FRAMES_IN_FLIGHT as u32)?;
        let signals = Semaphore::per_slot(device, FRAMES_IN_FLIGHT)?;

        debug!(
            "Created render stage '{}': {} target(s), {:?}",
            name,
            framebuffers.len(),
            targets
        );

        Ok(Self {
            name,
            framebuffers,
            attachments,
            signals,
            command_buffers,
            states: vec![RecordState::Initial; FRAMES_IN_FLIGHT],
            targets,
            pass,
            pool: pool.clone(),
        })
    }

    fn transition(&mut self, slot: usize, op: RecordOp) -> RenderResult<()> {
        let state = self.states[slot];
        match state.advance(op) {
            Some(next) => {
                self.states[slot] = next;
                Ok(())
            }
            None => Err(RenderError::OutOfSequence {
                called: op.name(),
                state: state.name(),
            }),
        }
    }

    fn check_slot(&self, slot: usize) -> RenderResult<()> {
        if slot >= FRAMES_IN_FLIGHT {
            return Err(RhiError::InvalidHandle(format!(
                "{}: frame slot {} out of range",
                self.name, slot
            ))
            .into());
        }
        Ok(())
    }

    /// Returns the slot's command buffer to the initial state. The slot's
    /// previous submission must have completed.
    pub fn reset(&mut self, slot: usize) -> RenderResult<()> {
        self.check_slot(slot)?;
        if self.states[slot] != RecordState::Initial {
            self.command_buffers[slot].reset()?;
        }
        self.transition(slot, RecordOp::Reset)
    }

    /// Begins recording the slot's command buffer.
    pub fn begin_commands(&mut self, slot: usize) -> RenderResult<&CommandBuffer> {
        self.check_slot(slot)?;
        self.transition(slot, RecordOp::BeginCommands)?;
        self.command_buffers[slot].begin()?;
        Ok(&self.command_buffers[slot])
    }

    /// Begins the pass on framebuffer `target` and sets viewport and scissor
    /// to its full extent.
    ///
    /// The viewport is flipped so clip space is Y-up.
    pub fn begin_pass(
        &mut self,
        slot: usize,
        target: usize,
        clear_values: &[vk::ClearValue],
    ) -> RenderResult<&CommandBuffer> {
        self.check_slot(slot)?;
        let Some(framebuffer) = self.framebuffers.get(target) else {
            return Err(RhiError::InvalidHandle(format!(
                "{}: target {} out of range ({} targets)",
                self.name,
                target,
                self.framebuffers.len()
            ))
            .into());
        };
        let (handle, extent) = (framebuffer.handle(), framebuffer.extent());
        self.transition(slot, RecordOp::BeginPass)?;

        let cmd = &self.command_buffers[slot];
        cmd.begin_render_pass(self.pass.handle(), handle, extent, clear_values);
        cmd.set_viewport(&flipped_viewport(extent));
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
        Ok(cmd)
    }

    pub fn end_pass(&mut self, slot: usize) -> RenderResult<()> {
        self.check_slot(slot)?;
        self.transition(slot, RecordOp::EndPass)?;
        self.command_buffers[slot].end_render_pass();
        Ok(())
    }

    pub fn end_commands(&mut self, slot: usize) -> RenderResult<()> {
        self.check_slot(slot)?;
        self.transition(slot, RecordOp::EndCommands)?;
        self.command_buffers[slot].end()?;
        Ok(())
    }

    /// Builds the submission of the slot's command buffer, waiting on
    /// `waits` and signaling this stage's semaphore for the slot.
    pub fn submit_info(
        &mut self,
        slot: usize,
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
    ) -> RenderResult<StageSubmission> {
        self.check_slot(slot)?;
        self.transition(slot, RecordOp::Submit)?;
        Ok(StageSubmission {
            wait_semaphores: waits.iter().map(|(s, _)| *s).collect(),
            wait_stages: waits.iter().map(|(_, stage)| *stage).collect(),
            command_buffers: [self.command_buffers[slot].handle()],
            signal_semaphores: vec![self.signals[slot].handle()],
        })
    }

    /// Builds a submission that waits on and signals nothing, for startup
    /// work the host waits on with a queue-idle wait.
    pub fn submit_once(&mut self, slot: usize) -> RenderResult<StageSubmission> {
        self.check_slot(slot)?;
        self.transition(slot, RecordOp::Submit)?;
        Ok(StageSubmission {
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            command_buffers: [self.command_buffers[slot].handle()],
            signal_semaphores: Vec::new(),
        })
    }

    /// Semaphore signaled when the slot's submission completes.
    #[inline]
    pub fn signal(&self, slot: usize) -> vk::Semaphore {
        self.signals[slot % FRAMES_IN_FLIGHT].handle()
    }

    #[inline]
    pub fn state(&self, slot: usize) -> RecordState {
        self.states[slot % FRAMES_IN_FLIGHT]
    }

    /// The command buffer being recorded for `slot`.
    #[inline]
    pub fn command_buffer(&self, slot: usize) -> &CommandBuffer {
        &self.command_buffers[slot % FRAMES_IN_FLIGHT]
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn pass(&self) -> &RenderPass {
        &self.pass
    }

    #[inline]
    pub fn targets(&self) -> RenderTargets {
        self.targets
    }

    #[inline]
    pub fn target_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn attachments(&self, target: usize) -> Option<&AttachmentCollection> {
        self.attachments.get(target)
    }

    /// Extent of target 0; every target of a stage shares it except mips of
    /// a pre-filter chain, which use one stage per mip.
    pub fn extent(&self) -> vk::Extent2D {
        self.framebuffers
            .first()
            .map(Framebuffer::extent)
            .unwrap_or_default()
    }
}

impl Drop for RenderStage {
    fn drop(&mut self) {
        if self
            .states
            .iter()
            .any(|s| matches!(s, RecordState::Recording | RecordState::InPass))
        {
            error!("Render stage '{}' dropped while recording", self.name);
        }
        self.pool.free(&self.command_buffers);
        debug!("Destroyed render stage '{}'", self.name);
    }
}

fn pass_formats(pass: &RenderPass) -> Vec<vk::Format> {
    let mut formats = pass.color_formats().to_vec();
    formats.extend(pass.depth_format());
    formats
}

/// Full-extent viewport with Y pointing up.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}
