//! GPU images and their views.
//!
//! [`Image`] owns a `VkImage`, its gpu-allocator allocation, a default view
//! covering every mip and layer, and any extra sub-views created through it.
//! Views are destroyed before the image, and the image before its memory is
//! returned to the allocator.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Description of an image to allocate.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Allocation name, shown in allocator reports.
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    /// Array layers; 6 for cubemaps.
    pub layers: u32,
    /// Create as cube-compatible and give the default view the `CUBE` type.
    pub cube: bool,
}

impl ImageDesc {
    /// A single-mip 2D image.
    pub fn new_2d(
        name: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name,
            extent,
            format,
            usage,
            mip_levels: 1,
            layers: 1,
            cube: false,
        }
    }

    /// A six-face cubemap with `mip_levels` levels.
    pub fn new_cube(
        name: &'static str,
        size: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
    ) -> Self {
        Self {
            name,
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            format,
            usage,
            mip_levels,
            layers: 6,
            cube: true,
        }
    }

    /// Aspect implied by the format.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for_format(self.format)
    }

    /// Range covering every mip and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect())
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.layers)
    }
}

/// GPU-only image with a default view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    /// Extra views created by [`Image::layer_view`] and [`Image::array_view`].
    sub_views: Vec<vk::ImageView>,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    /// Allocates the image and creates its default view.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero extent or when creation, allocation,
    /// binding or view creation fails.
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::ImageError(format!(
                "{}: extent must be non-zero",
                desc.name
            )));
        }
        if desc.cube && desc.layers != 6 {
            return Err(RhiError::ImageError(format!(
                "{}: cube images need 6 layers, got {}",
                desc.name, desc.layers
            )));
        }

        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut created = Self {
            device,
            image,
            view: vk::ImageView::null(),
            sub_views: Vec::new(),
            allocation: Some(allocation),
            desc,
        };

        if let Some(allocation) = created.allocation.as_ref() {
            unsafe {
                created.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        created.view = created.create_view(
            view_type_for(desc.layers, desc.cube),
            desc.full_range(),
        )?;

        debug!(
            "Created image '{}': {}x{} {:?}, {} mip(s), {} layer(s)",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.layers
        );
        Ok(created)
    }

    fn create_view(
        &self,
        view_type: vk::ImageViewType,
        range: vk::ImageSubresourceRange,
    ) -> RhiResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(self.desc.format)
            .subresource_range(range);
        Ok(unsafe { self.device.handle().create_image_view(&view_info, None)? })
    }

    /// Creates a 2D view of one mip level of one layer, owned by this image.
    ///
    /// Used to render a single cubemap face at a given mip.
    pub fn layer_view(&mut self, mip: u32, layer: u32) -> RhiResult<vk::ImageView> {
        self.check_subresource(mip, layer)?;
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(self.desc.aspect())
            .base_mip_level(mip)
            .level_count(1)
            .base_array_layer(layer)
            .layer_count(1);
        let view = self.create_view(vk::ImageViewType::TYPE_2D, range)?;
        self.sub_views.push(view);
        Ok(view)
    }

    /// Creates a `2D_ARRAY` view over every layer of mip 0, owned by this image.
    ///
    /// Layered framebuffers need an array view; the default `CUBE` view of a
    /// cubemap is for sampling.
    pub fn array_view(&mut self) -> RhiResult<vk::ImageView> {
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(self.desc.aspect())
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(self.desc.layers);
        let view = self.create_view(vk::ImageViewType::TYPE_2D_ARRAY, range)?;
        self.sub_views.push(view);
        Ok(view)
    }

    fn check_subresource(&self, mip: u32, layer: u32) -> RhiResult<()> {
        if mip >= self.desc.mip_levels || layer >= self.desc.layers {
            return Err(RhiError::ImageError(format!(
                "{}: subresource mip {} layer {} out of range ({} mips, {} layers)",
                self.desc.name, mip, layer, self.desc.mip_levels, self.desc.layers
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Default view covering all mips and layers.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            for view in self.sub_views.drain(..) {
                self.device.handle().destroy_image_view(view, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        tracing::error!("Failed to free image '{}': {:?}", self.desc.name, e);
                    }
                }
                Err(e) => tracing::error!("Leaking image '{}': {}", self.desc.name, e),
            }
        }
        debug!("Destroyed image '{}'", self.desc.name);
    }
}

/// Whether `format` is a depth (or depth-stencil) format.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect used for views of an image with `format`.
///
/// Depth-stencil formats are viewed through the depth aspect only.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// View type of the default view.
pub fn view_type_for(layers: u32, cube: bool) -> vk::ImageViewType {
    match (cube, layers) {
        (true, _) => vk::ImageViewType::CUBE,
        (false, 1) => vk::ImageViewType::TYPE_2D,
        (false, _) => vk::ImageViewType::TYPE_2D_ARRAY,
    }
}

/// Extent of mip level `mip`, never smaller than 1x1.
pub fn mip_extent(extent: vk::Extent2D, mip: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width >> mip).max(1),
        height: (extent.height >> mip).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_view_type_for() {
        assert_eq!(view_type_for(1, false), vk::ImageViewType::TYPE_2D);
        assert_eq!(view_type_for(4, false), vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(view_type_for(6, true), vk::ImageViewType::CUBE);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let extent = vk::Extent2D {
            width: 128,
            height: 32,
        };
        assert_eq!(mip_extent(extent, 2).width, 32);
        assert_eq!(mip_extent(extent, 6).height, 1);
        assert_eq!(mip_extent(extent, 6).width, 2);
    }

    #[test]
    fn test_cube_desc_full_range() {
        let desc = ImageDesc::new_cube(
            "env",
            64,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::SAMPLED,
            5,
        );
        let range = desc.full_range();
        assert_eq!(range.layer_count, 6);
        assert_eq!(range.level_count, 5);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
