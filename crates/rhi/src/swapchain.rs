//! Swapchain management.
//!
//! The swapchain is the chain of presentable images behind the window
//! surface. It goes stale whenever the surface changes size, which the
//! driver reports through `ERROR_OUT_OF_DATE_KHR` or a suboptimal flag on
//! acquire/present. Both are surfaced here as plain results so the frame
//! orchestrator can decide when to rebuild.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::RhiError;
use crate::instance::Instance;
use crate::surface::Surface;

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (image counts, extents, transforms).
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries what `surface` supports on `physical_device`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(physical_device: vk::PhysicalDevice, surface: &Surface) -> Result<Self, RhiError> {
        let loader = surface.loader();
        let handle = surface.handle();
        let capabilities =
            unsafe { loader.get_physical_device_surface_capabilities(physical_device, handle)? };
        let formats = unsafe { loader.get_physical_device_surface_formats(physical_device, handle)? };
        let present_modes =
            unsafe { loader.get_physical_device_surface_present_modes(physical_device, handle)? };

        debug!(
            "Swapchain support: {} formats, {} present modes, min images {}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan swapchain wrapper.
///
/// Owns the swapchain handle and one view per presentable image. The images
/// themselves belong to the swapchain.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain sized as close to `extent` as the surface allows.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface has no usable format or present mode,
    /// or if swapchain or image view creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: &Surface,
        extent: vk::Extent2D,
    ) -> Result<Self, RhiError> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
        };
        swapchain.build(surface, extent)?;
        Ok(swapchain)
    }

    /// Rebuilds the swapchain for a new surface extent.
    ///
    /// Waits for the device to go idle, hands the old handle to the driver
    /// as `old_swapchain`, then destroys it.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait or the new swapchain creation fails.
    pub fn recreate(&mut self, surface: &Surface, extent: vk::Extent2D) -> Result<(), RhiError> {
        self.device.wait_idle()?;
        info!("Recreating swapchain at {}x{}", extent.width, extent.height);
        self.build(surface, extent)
    }

    /// The extent a build would use right now for `requested`, or `None`
    /// while the surface is zero-sized (a minimized window).
    ///
    /// # Errors
    ///
    /// Returns an error if the surface capabilities cannot be queried.
    pub fn drawable_extent(
        &self,
        surface: &Surface,
        requested: vk::Extent2D,
    ) -> Result<Option<vk::Extent2D>, RhiError> {
        let support = SwapchainSupportDetails::query(self.device.physical_device(), surface)?;
        Ok(drawable(choose_extent(&support.capabilities, requested)))
    }

    fn build(&mut self, surface: &Surface, requested: vk::Extent2D) -> Result<(), RhiError> {
        let support = SwapchainSupportDetails::query(self.device.physical_device(), surface)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let Some(extent) = drawable(choose_extent(&support.capabilities, requested)) else {
            return Err(RhiError::SwapchainError(
                "surface is zero-sized; query drawable_extent before building".to_string(),
            ));
        };
        let image_count = determine_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let indices: Vec<u32> = families.unique_families();
        let sharing_mode = if indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let shared_indices: &[u32] = if indices.len() > 1 { &indices } else { &[] };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, self.format)?;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Acquires the next presentable image, waiting indefinitely.
    ///
    /// Returns the image index and the suboptimal flag. `ERROR_OUT_OF_DATE_KHR`
    /// is returned as the error value, untouched.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// Returns the suboptimal flag on success.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Format of the presentable images.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Extent of the presentable images.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of presentable images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views over the presentable images, in image-index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            info!(
                "Swapchain destroyed ({}x{})",
                self.extent.width, self.extent.height
            );
        }
    }
}

/// Prefers an 8-bit sRGB BGRA format, then UNORM, then whatever is first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let find = |format: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        return format;
    }
    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        warn!("Using fallback surface format B8G8R8A8_UNORM");
        return format;
    }
    warn!("Using first available surface format {:?}", formats[0].format);
    formats[0]
}

/// MAILBOX when available, otherwise FIFO, which is always supported.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// `None` for an extent no swapchain can have.
fn drawable(extent: vk::Extent2D) -> Option<vk::Extent2D> {
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>, RhiError> {
    let mut views = Vec::with_capacity(images.len());
    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "failed to create view for image {i}: {e:?}"
                )));
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 1,
                height: 1,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_zero_current_extent_is_not_drawable() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
        );
        assert!(drawable(extent).is_none());
        assert!(drawable(vk::Extent2D {
            width: 1280,
            height: 0,
        })
        .is_none());
        assert!(drawable(vk::Extent2D {
            width: 1,
            height: 1,
        })
        .is_some());
    }

    #[test]
    fn test_choose_extent_clamps_requested() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 4096,
                height: 10,
            },
        );
        assert_eq!((extent.width, extent.height), (1024, 64));
    }

    #[test]
    fn test_determine_image_count() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
        capabilities.max_image_count = 2;
        assert_eq!(determine_image_count(&capabilities), 2);
    }
}
