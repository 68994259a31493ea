//! Graphics pipelines.
//!
//! - [`PipelineLayout`] owns the descriptor set layouts order and push
//!   constant ranges a pipeline is compiled against
//! - [`GraphicsPipelineBuilder`] compiles a pipeline for subpass 0 of a
//!   [`RenderPass`], taking the number of color blend states from the pass
//!
//! Viewport and scissor are always dynamic, so a pipeline survives a resize
//! as long as its render pass does.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use penumbra_rhi::device::Device;
//! use penumbra_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, PipelineLayout};
//! use penumbra_rhi::render_pass::RenderPass;
//! use penumbra_rhi::shader::Shader;
//!
//! # fn example(device: Arc<Device>, pass: &RenderPass, vs: &Shader, fs: &Shader) -> Result<(), penumbra_rhi::RhiError> {
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//! // Fullscreen triangle: no vertex input, no depth.
//! let pipeline = GraphicsPipelineBuilder::new(pass)
//!     .vertex_shader(vs)
//!     .fragment_shader(fs)
//!     .cull_mode(CullMode::None)
//!     .depth_test_enable(false)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::render_pass::RenderPass;
use crate::shader::{Shader, ShaderStage};

/// Owned `VkPipelineLayout`.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout from set layouts (in set-index order) and push
    /// constant ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Push constant range of `T` visible to `stages`, starting at offset 0.
pub fn push_constant_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

/// Owned graphics `VkPipeline`.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    name: &'static str,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed pipeline for '{}'", self.name);
    }
}

/// Face culling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Depth comparison.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    #[default]
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Blend state of one color attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorBlend {
    /// Overwrite the destination.
    #[default]
    Opaque,
    /// `dst + src`, used to accumulate light volumes.
    Additive,
    /// `src * src.a + dst * (1 - src.a)`.
    Alpha,
}

impl ColorBlend {
    pub fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            ColorBlend::Opaque => state.blend_enable(false),
            ColorBlend::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
            ColorBlend::Alpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Builder for a graphics pipeline bound to subpass 0 of a render pass.
///
/// Defaults: triangle list, fill, back-face culling, counter-clockwise front
/// faces, depth test and write with `Less` when the pass has a depth
/// attachment, opaque blending on every color attachment, no vertex input.
pub struct GraphicsPipelineBuilder<'a> {
    render_pass: &'a RenderPass,
    vertex_shader: Option<&'a Shader>,
    geometry_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    cull_mode: CullMode,
    front_face: vk::FrontFace,
    depth_test_enable: bool,
    depth_write_enable: bool,
    depth_compare_op: CompareOp,
    depth_bias: Option<(f32, f32)>,
    blends: Vec<ColorBlend>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(render_pass: &'a RenderPass) -> Self {
        let color_count = render_pass.color_formats().len();
        Self {
            render_pass,
            vertex_shader: None,
            geometry_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::Back,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::Less,
            depth_bias: None,
            blends: vec![ColorBlend::Opaque; color_count],
        }
    }

    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Adds a geometry stage, e.g. to replicate triangles onto cube layers.
    pub fn geometry_shader(mut self, shader: &'a Shader) -> Self {
        self.geometry_shader = Some(shader);
        self
    }

    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    /// Declares the vertex buffer layout. Leave unset for pipelines that
    /// generate their vertices, like the fullscreen triangle.
    pub fn vertex_input(
        mut self,
        binding: vk::VertexInputBindingDescription,
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = vec![binding];
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: vk::FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth_test_enable(mut self, enable: bool) -> Self {
        self.depth_test_enable = enable;
        self
    }

    pub fn depth_write_enable(mut self, enable: bool) -> Self {
        self.depth_write_enable = enable;
        self
    }

    pub fn depth_compare_op(mut self, op: CompareOp) -> Self {
        self.depth_compare_op = op;
        self
    }

    /// Constant and slope depth bias, for shadow casters.
    pub fn depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.depth_bias = Some((constant, slope));
        self
    }

    /// Sets the blend state of every color attachment.
    pub fn blend_all(mut self, blend: ColorBlend) -> Self {
        self.blends.iter_mut().for_each(|b| *b = blend);
        self
    }

    /// Sets the blend state of color attachment `index`.
    pub fn blend(mut self, index: usize, blend: ColorBlend) -> Self {
        if let Some(slot) = self.blends.get_mut(index) {
            *slot = blend;
        }
        self
    }

    /// Checks stage and attachment consistency without touching the device.
    pub fn validate(&self) -> RhiResult<()> {
        let pass = self.render_pass.name();
        let check_stage = |shader: Option<&Shader>, expected: ShaderStage| match shader {
            Some(s) if s.stage() != expected => Err(RhiError::PipelineError(format!(
                "{}: {} shader bound to the {} slot",
                pass,
                s.stage(),
                expected
            ))),
            _ => Ok(()),
        };

        if self.vertex_shader.is_none() {
            return Err(RhiError::PipelineError(format!(
                "{}: vertex shader is required",
                pass
            )));
        }
        check_stage(self.vertex_shader, ShaderStage::Vertex)?;
        check_stage(self.geometry_shader, ShaderStage::Geometry)?;
        check_stage(self.fragment_shader, ShaderStage::Fragment)?;

        if self.fragment_shader.is_none() && !self.render_pass.color_formats().is_empty() {
            return Err(RhiError::PipelineError(format!(
                "{}: fragment shader is required for color output",
                pass
            )));
        }
        Ok(())
    }

    fn uses_depth(&self) -> bool {
        self.render_pass.depth_format().is_some()
    }

    /// Compiles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or pipeline creation fails.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        self.validate()?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = [
            self.vertex_shader,
            self.geometry_shader,
            self.fragment_shader,
        ]
        .into_iter()
        .flatten()
        .map(Shader::stage_create_info)
        .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let (bias_constant, bias_slope) = self.depth_bias.unwrap_or((0.0, 0.0));
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face)
            .depth_bias_enable(self.depth_bias.is_some())
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_slope_factor(bias_slope);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let has_depth = self.uses_depth();
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth && self.depth_test_enable)
            .depth_write_enable(has_depth && self.depth_write_enable)
            .depth_compare_op(self.depth_compare_op.to_vk())
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_states: Vec<vk::PipelineColorBlendAttachmentState> =
            self.blends.iter().map(|b| b.to_vk()).collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_states);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(self.render_pass.handle())
            .subpass(0);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        debug!(
            "Created pipeline for '{}': {} stage(s), {} blend state(s)",
            self.render_pass.name(),
            stages.len(),
            blend_states.len()
        );

        Ok(Pipeline {
            device,
            pipeline,
            name: self.render_pass.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
    }

    #[test]
    fn test_compare_op_to_vk() {
        assert_eq!(CompareOp::Less.to_vk(), vk::CompareOp::LESS);
        assert_eq!(CompareOp::LessOrEqual.to_vk(), vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(CompareOp::Always.to_vk(), vk::CompareOp::ALWAYS);
    }

    #[test]
    fn test_additive_blend_accumulates() {
        let state = ColorBlend::Additive.to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
    }

    #[test]
    fn test_opaque_blend_disabled() {
        let state = ColorBlend::default().to_vk();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_push_constant_range_size() {
        let range = push_constant_range::<[f32; 20]>(vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(range.size, 80);
        assert_eq!(range.offset, 0);
    }
}
