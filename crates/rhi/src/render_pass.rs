//! Render pass descriptions.
//!
//! Every pass in the renderer is a single-subpass `VkRenderPass`. The pass
//! declares its color attachments in shader output order followed by an
//! optional depth attachment, the layout each attachment ends in, and the
//! external dependencies that order it against neighbouring passes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use penumbra_rhi::device::Device;
//! use penumbra_rhi::render_pass::{AttachmentDesc, RenderPassBuilder, SubpassDependency};
//!
//! # fn example(device: Arc<Device>) -> Result<(), penumbra_rhi::RhiError> {
//! let pass = RenderPassBuilder::new("bloom")
//!     .color(AttachmentDesc::sampled_color(vk::Format::R16G16B16A16_SFLOAT))
//!     .dependency(SubpassDependency::external_to_attachments())
//!     .dependency(SubpassDependency::attachments_to_fragment_read())
//!     .build(device)?;
//! assert_eq!(pass.color_formats().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What happens to an attachment's contents when the pass begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

impl LoadOp {
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

/// What happens to an attachment's contents when the pass ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

impl StoreOp {
    pub fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// One attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Cleared color target that is sampled by a later pass.
    pub fn sampled_color(format: vk::Format) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Cleared swapchain image handed to the presentation engine.
    pub fn presented(format: vk::Format) -> Self {
        Self {
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Self::sampled_color(format)
        }
    }

    /// Cleared depth target that is sampled afterwards, e.g. a shadow map.
    pub fn sampled_depth(format: vk::Format) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        }
    }

    /// Depth buffer used for testing only; its contents are discarded.
    pub fn transient_depth(format: vk::Format) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op.to_vk())
            .store_op(self.store_op.to_vk())
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// External dependency of the single subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

const ATTACHMENT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

const ATTACHMENT_WRITES: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

impl SubpassDependency {
    /// Orders the attachment writes of this pass after earlier sampling of,
    /// and writes to, the same images in a previous frame.
    pub fn external_to_attachments() -> Self {
        Self {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER | ATTACHMENT_STAGES,
            dst_stage: ATTACHMENT_STAGES,
            src_access: ATTACHMENT_WRITES,
            dst_access: ATTACHMENT_WRITES
                | vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        }
    }

    /// Makes the attachment writes of this pass visible to fragment shaders
    /// of later passes.
    pub fn attachments_to_fragment_read() -> Self {
        Self {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage: ATTACHMENT_STAGES,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: ATTACHMENT_WRITES,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    fn to_vk(self) -> vk::SubpassDependency {
        vk::SubpassDependency::default()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .dependency_flags(vk::DependencyFlags::BY_REGION)
    }
}

/// Builder for a single-subpass render pass.
#[derive(Debug, Clone)]
pub struct RenderPassBuilder {
    name: &'static str,
    colors: Vec<AttachmentDesc>,
    depth: Option<AttachmentDesc>,
    dependencies: Vec<SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            colors: Vec::new(),
            depth: None,
            dependencies: Vec::new(),
        }
    }

    /// Appends a color attachment; its index is the fragment output location.
    pub fn color(mut self, attachment: AttachmentDesc) -> Self {
        self.colors.push(attachment);
        self
    }

    pub fn depth(mut self, attachment: AttachmentDesc) -> Self {
        self.depth = Some(attachment);
        self
    }

    pub fn dependency(mut self, dependency: SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Checks the description without touching the device.
    pub fn validate(&self) -> RhiResult<()> {
        if self.colors.is_empty() && self.depth.is_none() {
            return Err(RhiError::RenderPassError(format!(
                "{}: a render pass needs at least one attachment",
                self.name
            )));
        }
        if let Some(color) = self
            .colors
            .iter()
            .find(|c| crate::image::is_depth_format(c.format))
        {
            return Err(RhiError::RenderPassError(format!(
                "{}: depth format {:?} used as a color attachment",
                self.name, color.format
            )));
        }
        if let Some(depth) = self.depth
            && !crate::image::is_depth_format(depth.format)
        {
            return Err(RhiError::RenderPassError(format!(
                "{}: {:?} is not a depth format",
                self.name, depth.format
            )));
        }
        Ok(())
    }

    /// Creates the `VkRenderPass`.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is invalid or creation fails.
    pub fn build(self, device: Arc<Device>) -> RhiResult<RenderPass> {
        self.validate()?;

        let mut attachments: Vec<vk::AttachmentDescription> =
            self.colors.iter().map(|c| c.to_vk()).collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..self.colors.len() as u32)
            .map(|index| {
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .collect();

        let depth_ref = self.depth.map(|depth| {
            attachments.push(depth.to_vk());
            vk::AttachmentReference::default()
                .attachment(self.colors.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let dependencies: Vec<vk::SubpassDependency> =
            self.dependencies.iter().map(|d| d.to_vk()).collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };
        debug!(
            "Created render pass '{}': {} color, depth {:?}",
            self.name,
            self.colors.len(),
            self.depth.map(|d| d.format)
        );

        Ok(RenderPass {
            device,
            render_pass,
            name: self.name,
            color_formats: self.colors.iter().map(|c| c.format).collect(),
            depth_format: self.depth.map(|d| d.format),
        })
    }
}

/// Owned `VkRenderPass` with the formats it was declared with.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    name: &'static str,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
}

impl RenderPass {
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn color_formats(&self) -> &[vk::Format] {
        &self.color_formats
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Color attachments plus the depth attachment, if any.
    pub fn attachment_count(&self) -> usize {
        self.color_formats.len() + usize::from(self.depth_format.is_some())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed render pass '{}'", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_presets_final_layouts() {
        let format = vk::Format::R8G8B8A8_UNORM;
        assert_eq!(
            AttachmentDesc::sampled_color(format).final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            AttachmentDesc::presented(format).final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        let depth = AttachmentDesc::transient_depth(vk::Format::D32_SFLOAT);
        assert_eq!(depth.store_op, StoreOp::DontCare);
        assert_eq!(
            AttachmentDesc::sampled_depth(vk::Format::D32_SFLOAT).store_op,
            StoreOp::Store
        );
    }

    #[test]
    fn test_load_op_to_vk() {
        assert_eq!(LoadOp::Load.to_vk(), vk::AttachmentLoadOp::LOAD);
        assert_eq!(LoadOp::Clear.to_vk(), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(StoreOp::DontCare.to_vk(), vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_dependencies_bracket_the_subpass() {
        let incoming = SubpassDependency::external_to_attachments();
        assert_eq!(incoming.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(incoming.dst_subpass, 0);
        assert!(incoming.src_stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));

        let outgoing = SubpassDependency::attachments_to_fragment_read();
        assert_eq!(outgoing.src_subpass, 0);
        assert_eq!(outgoing.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(outgoing.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_validate_rejects_empty_pass() {
        assert!(RenderPassBuilder::new("empty").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_swapped_formats() {
        let depth_as_color = RenderPassBuilder::new("bad")
            .color(AttachmentDesc::sampled_color(vk::Format::D32_SFLOAT));
        assert!(depth_as_color.validate().is_err());

        let color_as_depth = RenderPassBuilder::new("bad")
            .depth(AttachmentDesc::transient_depth(vk::Format::R8G8B8A8_UNORM));
        assert!(color_as_depth.validate().is_err());

        let ok = RenderPassBuilder::new("gbuffer")
            .color(AttachmentDesc::sampled_color(vk::Format::R8G8B8A8_UNORM))
            .depth(AttachmentDesc::transient_depth(vk::Format::D32_SFLOAT));
        assert!(ok.validate().is_ok());
    }
}
