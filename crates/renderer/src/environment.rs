//! Image-based lighting inputs, filtered once at startup.
//!
//! From a source sky cube this produces a diffuse irradiance cube, a
//! specular cube whose mips hold increasing roughness, and a BRDF
//! integration LUT. Each cube face of each mip is one pass of a
//! [`RenderTargets::PerCubeFace`] stage drawing a fullscreen triangle.
//! All passes go to the queue in one submission and the host waits for
//! the queue to go idle; this is the only host-side wait outside
//! `begin_frame`.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use penumbra_resources::CubeFaces;
use penumbra_rhi::command::CommandPool;
use penumbra_rhi::descriptor::DescriptorWriter;
use penumbra_rhi::device::Device;
use penumbra_rhi::image::{mip_extent, Image, ImageDesc};
use penumbra_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline};
use penumbra_rhi::render_pass::RenderPass;
use penumbra_rhi::shader::Shader;
use penumbra_rhi::{RhiError, RhiResult};

use crate::attachments::{AttachmentCollection, AttachmentShape, HDR_FORMAT};
use crate::bindings::{repoint_image_set, BindingLayouts, BindingShape, DescriptorPools};
use crate::error::RenderResult;
use crate::pipelines::{build_render_pass, PipelineLayouts, Shaders};
use crate::render_stage::{RenderStage, RenderTargets, StageSubmission};
use crate::texture::Texture;
use crate::ubo::EnvironmentPush;

pub const IRRADIANCE_SIZE: u32 = 32;
pub const PREFILTER_MIPS: u32 = 5;
pub const BRDF_LUT_SIZE: u32 = 512;

/// Roughness filtered into pre-filter mip `mip`: 0 at the base, 1 at the
/// last mip.
pub fn mip_roughness(mip: u32) -> f32 {
    mip as f32 / (PREFILTER_MIPS - 1) as f32
}

fn square(size: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: size,
        height: size,
    }
}

fn clear_black() -> [vk::ClearValue; 1] {
    [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    }]
}

/// Irradiance cube, pre-filtered cube and BRDF LUT, bound as one set.
pub struct EnvironmentMaps {
    set: vk::DescriptorSet,
    brdf: RenderStage,
    prefiltered: Image,
    irradiance: Image,
}

/// Per-face stage over one mip of a cube image.
fn face_stage(
    device: &Arc<Device>,
    command_pool: &Arc<CommandPool>,
    name: &'static str,
    cube: &mut Image,
    mip: u32,
) -> RhiResult<RenderStage> {
    let extent = mip_extent(cube.extent(), mip);
    let targets = (0..6)
        .map(|face| {
            cube.layer_view(mip, face)
                .map(|view| AttachmentCollection::borrowed(view, HDR_FORMAT, extent))
        })
        .collect::<RhiResult<Vec<_>>>()?;
    let pass = build_render_pass(device, name, AttachmentShape::Surface, HDR_FORMAT, true)?;
    RenderStage::new(device, command_pool, pass, RenderTargets::PerCubeFace, targets)
}

fn fullscreen_pipeline(
    device: &Arc<Device>,
    pass: &RenderPass,
    vertex: &Shader,
    fragment: &Shader,
    layouts: &PipelineLayouts,
) -> RhiResult<Pipeline> {
    GraphicsPipelineBuilder::new(pass)
        .vertex_shader(vertex)
        .fragment_shader(fragment)
        .cull_mode(CullMode::None)
        .build(device.clone(), &layouts.environment)
}

/// Records every face of `stage` sampling the source set.
fn record_faces(
    stage: &mut RenderStage,
    pipeline: &Pipeline,
    layouts: &PipelineLayouts,
    source_set: vk::DescriptorSet,
    roughness: f32,
) -> RenderResult<StageSubmission> {
    stage.reset(0)?;
    stage.begin_commands(0)?;
    for face in 0..6 {
        let cmd = stage.begin_pass(0, face, &clear_black())?;
        cmd.bind_pipeline(pipeline.handle());
        cmd.bind_descriptor_sets(layouts.environment.handle(), 0, &[source_set]);
        cmd.push_constants(
            layouts.environment.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            &EnvironmentPush::new(face as u32, roughness),
        );
        cmd.draw(3);
        stage.end_pass(0)?;
    }
    stage.end_commands(0)?;
    stage.submit_once(0)
}

impl EnvironmentMaps {
    /// Filters `sky` and binds the results into a new environment set.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &Arc<Device>,
        command_pool: &Arc<CommandPool>,
        shaders: &Shaders,
        layouts: &PipelineLayouts,
        binding_layouts: &BindingLayouts,
        pools: &mut DescriptorPools,
        sampler: vk::Sampler,
        sky: &CubeFaces,
        resolution: u32,
    ) -> RenderResult<Self> {
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let mut irradiance = Image::new(
            device.clone(),
            ImageDesc::new_cube("irradiance", IRRADIANCE_SIZE, HDR_FORMAT, usage, 1),
        )?;
        let mut prefiltered = Image::new(
            device.clone(),
            ImageDesc::new_cube(
                "prefiltered",
                resolution.max(1 << (PREFILTER_MIPS - 1)),
                HDR_FORMAT,
                usage,
                PREFILTER_MIPS,
            ),
        )?;

        let source = Texture::upload_cube(device, command_pool, sky, "environment_source")?;
        let source_set = pools
            .sampling
            .allocate(&[binding_layouts.get(BindingShape::SingleTexture)])?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("descriptor pool returned no set".into()))?;
        repoint_image_set(
            device,
            source_set,
            sampler,
            &[(source.view(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)],
        );

        let mut irradiance_stage =
            face_stage(device, command_pool, "irradiance", &mut irradiance, 0)?;
        let mut prefilter_stages = (0..PREFILTER_MIPS)
            .map(|mip| face_stage(device, command_pool, "prefilter", &mut prefiltered, mip))
            .collect::<RhiResult<Vec<_>>>()?;
        let mut brdf = RenderStage::new(
            device,
            command_pool,
            build_render_pass(device, "brdf_lut", AttachmentShape::SingleColor, HDR_FORMAT, false)?,
            RenderTargets::Single,
            vec![AttachmentCollection::new(
                device,
                AttachmentShape::SingleColor,
                square(BRDF_LUT_SIZE),
            )?],
        )?;

        let irradiance_pipeline = fullscreen_pipeline(
            device,
            irradiance_stage.pass(),
            &shaders.fullscreen_vert,
            &shaders.irradiance_frag,
            layouts,
        )?;
        let prefilter_pipeline = fullscreen_pipeline(
            device,
            prefilter_stages[0].pass(),
            &shaders.fullscreen_vert,
            &shaders.prefilter_frag,
            layouts,
        )?;
        let brdf_pipeline = fullscreen_pipeline(
            device,
            brdf.pass(),
            &shaders.fullscreen_vert,
            &shaders.brdf_frag,
            layouts,
        )?;

        let mut submissions = vec![record_faces(
            &mut irradiance_stage,
            &irradiance_pipeline,
            layouts,
            source_set,
            0.0,
        )?];
        for (mip, stage) in prefilter_stages.iter_mut().enumerate() {
            submissions.push(record_faces(
                stage,
                &prefilter_pipeline,
                layouts,
                source_set,
                mip_roughness(mip as u32),
            )?);
        }

        brdf.reset(0)?;
        brdf.begin_commands(0)?;
        let cmd = brdf.begin_pass(0, 0, &clear_black())?;
        cmd.bind_pipeline(brdf_pipeline.handle());
        cmd.draw(3);
        brdf.end_pass(0)?;
        brdf.end_commands(0)?;
        submissions.push(brdf.submit_once(0)?);

        let infos: Vec<vk::SubmitInfo> = submissions.iter().map(StageSubmission::info).collect();
        unsafe { device.submit_graphics(&infos, vk::Fence::null())? };
        device.wait_graphics_idle()?;

        pools.sampling.free(&[source_set])?;
        drop(source);
        drop(prefilter_stages);
        drop(irradiance_stage);

        let brdf_view = brdf
            .attachments(0)
            .and_then(|a| a.sampled_color(0))
            .ok_or_else(|| RhiError::ImageError("BRDF LUT has no color view".into()))?;
        let set = pools
            .environment
            .allocate(&[binding_layouts.get(BindingShape::Environment)])?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("descriptor pool returned no set".into()))?;
        let read = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        DescriptorWriter::new()
            .image(0, sampler, irradiance.view(), read)
            .image(1, sampler, prefiltered.view(), read)
            .image(2, sampler, brdf_view, read)
            .write(device, set);

        info!(
            "Filtered environment: irradiance {}², pre-filtered {}² x {} mips, BRDF LUT {}²",
            IRRADIANCE_SIZE,
            prefiltered.extent().width,
            PREFILTER_MIPS,
            BRDF_LUT_SIZE
        );

        Ok(Self {
            set,
            brdf,
            prefiltered,
            irradiance,
        })
    }

    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn irradiance(&self) -> &Image {
        &self.irradiance
    }

    pub fn prefiltered(&self) -> &Image {
        &self.prefiltered
    }

    pub fn brdf_lut(&self) -> Option<vk::ImageView> {
        self.brdf.attachments(0).and_then(|a| a.sampled_color(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_roughness_spans_unit_range() {
        assert_eq!(mip_roughness(0), 0.0);
        assert_eq!(mip_roughness(PREFILTER_MIPS - 1), 1.0);
        assert!((mip_roughness(2) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_smallest_mip_is_not_empty() {
        let base = square(1 << (PREFILTER_MIPS - 1));
        let last = mip_extent(base, PREFILTER_MIPS - 1);
        assert_eq!((last.width, last.height), (1, 1));
    }
}
