//! Framebuffers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::render_pass::RenderPass;

/// Owned `VkFramebuffer` bound to a render pass.
///
/// A framebuffer with `layers > 1` is rendered through a geometry stage that
/// routes each primitive to a layer, e.g. the six faces of a shadow cube.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    layers: u32,
}

impl Framebuffer {
    /// Creates a framebuffer over `views`, which must match the pass's
    /// attachments in count and order.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> RhiResult<Self> {
        if views.len() != render_pass.attachment_count() {
            return Err(RhiError::RenderPassError(format!(
                "{}: framebuffer has {} view(s), pass declares {} attachment(s)",
                render_pass.name(),
                views.len(),
                render_pass.attachment_count()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers.max(1));

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        debug!(
            "Created framebuffer for '{}': {}x{}x{}",
            render_pass.name(),
            extent.width,
            extent.height,
            layers
        );

        Ok(Self {
            device,
            framebuffer,
            extent,
            layers,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn layers(&self) -> u32 {
        self.layers
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}
