//! Device and surface context.
//!
//! [`DeviceContext`] owns everything tied to the GPU and the window surface:
//! instance, surface, logical device, command pool and swapchain. Only the
//! swapchain is rebuilt on resize; the rest lives as long as the renderer.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use penumbra_core::RendererConfig;
use penumbra_rhi::command::{CommandBuffer, CommandPool};
use penumbra_rhi::device::Device;
use penumbra_rhi::instance::Instance;
use penumbra_rhi::physical_device::select_physical_device;
use penumbra_rhi::surface::Surface;
use penumbra_rhi::swapchain::Swapchain;
use penumbra_rhi::{RhiError, RhiResult};

use crate::error::{RenderError, RenderResult};

/// Result of asking the swapchain for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// Usable this frame, but the swapchain should be rebuilt soon.
    Suboptimal(u32),
    /// The swapchain no longer matches the surface. Nothing was acquired.
    Stale,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    Stale,
}

/// Maps a raw acquire result, keeping staleness out of the error path.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

/// Maps a raw present result, keeping staleness out of the error path.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

/// GPU device, queues, command pool and presentable image chain.
///
/// Fields drop in declaration order: the pool and swapchain go before the
/// device, and the surface before the instance. Every other object holding
/// an `Arc<Device>` must be dropped before this context.
pub struct DeviceContext {
    command_pool: Arc<CommandPool>,
    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl DeviceContext {
    /// Brings up Vulkan for a window.
    ///
    /// # Errors
    ///
    /// Any creation failure is returned as is; there is no fallback device
    /// or degraded mode.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: vk::Extent2D,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let instance = Instance::new(display, config.enable_validation)?;
        let surface = Surface::new(&instance, display, window)?;
        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Selected GPU: {} ({})",
            physical_device_info.device_name(),
            physical_device_info.device_type_name()
        );

        let device = Device::new(&instance, &physical_device_info)?;
        let command_pool = Arc::new(CommandPool::new(device.clone(), device.graphics_family())?);
        let swapchain = Swapchain::new(&instance, device.clone(), &surface, extent)?;

        info!(
            "Device context ready: {}x{}, {} swapchain images, format {:?}",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            swapchain.format()
        );

        Ok(Self {
            command_pool,
            swapchain,
            device,
            surface,
            instance,
        })
    }

    /// Rebuilds the swapchain for `extent`, handing the old one to the driver.
    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Surface(format!(
                "cannot size swapchain to {}x{}",
                extent.width, extent.height
            )));
        }
        self.swapchain.recreate(&self.surface, extent)?;
        Ok(())
    }

    /// The extent a swapchain rebuild would get for `requested`, or `None`
    /// while the window is minimized.
    pub fn drawable_extent(&self, requested: vk::Extent2D) -> RenderResult<Option<vk::Extent2D>> {
        Ok(self.swapchain.drawable_extent(&self.surface, requested)?)
    }

    /// Acquires the next presentable image, waiting indefinitely.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let outcome = classify_acquire(self.swapchain.acquire_next_image(semaphore))?;
        if outcome == AcquireOutcome::Stale {
            debug!("Swapchain out of date during acquire");
        }
        Ok(outcome)
    }

    /// Queues `image_index` for presentation once `wait` signals.
    pub fn present(&self, wait: vk::Semaphore, image_index: u32) -> RenderResult<PresentOutcome> {
        let outcome = classify_present(self.swapchain.present(
            self.device.present_queue(),
            image_index,
            wait,
        ))?;
        match outcome {
            PresentOutcome::Stale => debug!("Swapchain out of date during present"),
            PresentOutcome::Suboptimal => warn!("Swapchain suboptimal during present"),
            PresentOutcome::Presented => {}
        }
        Ok(outcome)
    }

    /// Records and runs transient work, then waits for the queue to idle.
    ///
    /// For startup and asset upload only.
    pub fn run_one_shot<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        self.command_pool.run_one_shot(record)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn command_pool(&self) -> &Arc<CommandPool> {
        &self.command_pool
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn surface_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during context drop: {:?}", e);
        }
        info!("Device context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired(2)
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquireOutcome::Suboptimal(1)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Stale
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap(),
            PresentOutcome::Suboptimal
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
