//! Sampled textures uploaded from host pixel buffers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use penumbra_resources::{CubeFaces, TextureData};
use penumbra_rhi::buffer::{Buffer, BufferUsage};
use penumbra_rhi::command::CommandPool;
use penumbra_rhi::device::Device;
use penumbra_rhi::image::{Image, ImageDesc};
use penumbra_rhi::RhiResult;

/// A GPU image in `SHADER_READ_ONLY_OPTIMAL`, ready to sample.
pub struct Texture {
    image: Image,
}

impl Texture {
    /// Uploads an RGBA8 texture through a staging buffer.
    pub fn upload(
        device: &Arc<Device>,
        pool: &CommandPool,
        data: &TextureData,
        name: &'static str,
    ) -> RhiResult<Self> {
        let desc = ImageDesc::new_2d(
            name,
            vk::Extent2D {
                width: data.width(),
                height: data.height(),
            },
            data.format(),
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        );
        Self::upload_layers(device, pool, desc, data.pixels())
    }

    /// Uploads six sRGB faces into a cube image.
    pub fn upload_cube(
        device: &Arc<Device>,
        pool: &CommandPool,
        faces: &CubeFaces,
        name: &'static str,
    ) -> RhiResult<Self> {
        let desc = ImageDesc::new_cube(
            name,
            faces.size(),
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            1,
        );
        Self::upload_layers(device, pool, desc, faces.pixels())
    }

    fn upload_layers(
        device: &Arc<Device>,
        pool: &CommandPool,
        desc: ImageDesc,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let staging = Buffer::new(
            device.clone(),
            BufferUsage::Staging,
            pixels.len() as vk::DeviceSize,
        )?;
        staging.write_bytes(0, pixels)?;

        let image = Image::new(device.clone(), desc)?;
        let range = desc.full_range();
        pool.run_one_shot(|cmd| {
            cmd.transition_image_layout(
                image.handle(),
                range,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(staging.handle(), image.handle(), desc.extent, desc.layers);
            cmd.transition_image_layout(
                image.handle(),
                range,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            Ok(())
        })?;

        debug!(
            "Uploaded texture '{}': {}x{}, {} layer(s)",
            desc.name, desc.extent.width, desc.extent.height, desc.layers
        );
        Ok(Self { image })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }
}
