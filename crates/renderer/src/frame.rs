//! Per-slot frame synchronization.
//!
//! Each frame slot owns a fence, signaled by the last submission of the
//! frame, and a semaphore signaled when a swapchain image is acquired.
//! Pass-to-pass semaphores belong to the render stages.
//!
//! ```text
//! 1. Wait on the slot's fence (the slot's previous frame has retired)
//! 2. Acquire a swapchain image, signaling image_acquired
//! 3. Reset the fence, only once a frame will surely be submitted
//! 4. Submit the pass chain; the final pass signals the fence
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use penumbra_core::config::FRAMES_IN_FLIGHT;
use penumbra_rhi::device::Device;
use penumbra_rhi::sync::{Fence, Semaphore};
use penumbra_rhi::RhiResult;

use crate::bindings::PerFrame;

struct SlotSync {
    in_flight: Fence,
    image_acquired: Semaphore,
}

/// Fences and acquire semaphores for every frame slot.
pub struct FrameSync {
    slots: PerFrame<SlotSync>,
}

impl FrameSync {
    pub fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let slots = PerFrame::try_new(|_| {
            Ok::<_, penumbra_rhi::RhiError>(SlotSync {
                // Signaled so the first wait on each slot returns immediately.
                in_flight: Fence::new(device.clone(), true)?,
                image_acquired: Semaphore::new(device.clone())?,
            })
        })?;
        debug!("Created frame sync for {} slot(s)", FRAMES_IN_FLIGHT);
        Ok(Self { slots })
    }

    /// Blocks until the slot's previous frame has completed on the device.
    pub fn wait(&self, slot: usize) -> RhiResult<()> {
        self.slots[slot].in_flight.wait()
    }

    /// Unsignals the slot's fence. Only call once the frame will be submitted.
    pub fn reset(&self, slot: usize) -> RhiResult<()> {
        self.slots[slot].in_flight.reset()
    }

    #[inline]
    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.slots[slot].in_flight.handle()
    }

    #[inline]
    pub fn image_acquired(&self, slot: usize) -> vk::Semaphore {
        self.slots[slot].image_acquired.handle()
    }

    /// Whether every slot's fence is signaled, i.e. nothing is in flight.
    pub fn all_idle(&self) -> bool {
        self.slots.iter().all(|s| s.in_flight.is_signaled())
    }
}
