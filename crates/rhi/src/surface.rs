//! Presentation surface.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// RAII wrapper for a `VkSurfaceKHR` created through `ash-window`.
///
/// The instance must outlive the surface, and the surface must outlive every
/// swapchain built on it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for the given raw window and display handles.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the platform surface cannot be
    /// created for this window.
    pub fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        // SAFETY: the caller's window outlives the renderer, and the handles
        // come from that window.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
                .map_err(|e| RhiError::SurfaceError(format!("Failed to create surface: {e:?}")))?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        debug!("Vulkan surface created");
        Ok(Self { handle, loader })
    }

    /// Raw surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface extension loader, used to query capabilities and formats.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}
