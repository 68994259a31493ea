//! Shader modules, pipeline layouts and render pass declarations.
//!
//! Shaders and layouts live as long as the renderer. Render passes and
//! pipelines that depend on the surface format are rebuilt with the surface
//! targets and only borrow from here.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use penumbra_resources::ShaderLibrary;
use penumbra_rhi::device::Device;
use penumbra_rhi::pipeline::{push_constant_range, PipelineLayout};
use penumbra_rhi::render_pass::{AttachmentDesc, RenderPass, RenderPassBuilder, SubpassDependency};
use penumbra_rhi::shader::{Shader, ShaderStage};
use penumbra_rhi::RhiResult;

use crate::attachments::AttachmentShape;
use crate::bindings::{BindingLayouts, BindingShape};
use crate::error::RenderResult;
use crate::ubo::{
    BlurPush, DirectionalPush, EnvironmentPush, LightVolumePush, ModelPush, PostPush, ShadowPush,
};

/// Blob name of a shader: `<name>.<stage extension>`.
pub fn shader_file_name(name: &str, stage: ShaderStage) -> String {
    format!("{}.{}", name, stage.extension())
}

fn load(
    device: &Arc<Device>,
    library: &ShaderLibrary,
    name: &str,
    stage: ShaderStage,
) -> RenderResult<Shader> {
    let bytes = library.load(&shader_file_name(name, stage))?;
    Ok(Shader::from_spirv_bytes(device.clone(), &bytes, stage)?)
}

/// Every shader module the renderer uses.
pub struct Shaders {
    pub gbuffer_vert: Shader,
    pub gbuffer_frag: Shader,
    pub directional_shadow_vert: Shader,
    pub point_shadow_vert: Shader,
    pub point_shadow_geom: Shader,
    pub point_shadow_frag: Shader,
    pub fullscreen_vert: Shader,
    pub composition_frag: Shader,
    pub light_volume_vert: Shader,
    pub light_volume_frag: Shader,
    pub bloom_frag: Shader,
    pub post_frag: Shader,
    pub irradiance_frag: Shader,
    pub prefilter_frag: Shader,
    pub brdf_frag: Shader,
}

impl Shaders {
    /// Every blob name the library must provide.
    pub const FILES: [(&'static str, ShaderStage); 15] = [
        ("gbuffer", ShaderStage::Vertex),
        ("gbuffer", ShaderStage::Fragment),
        ("directional_shadow", ShaderStage::Vertex),
        ("point_shadow", ShaderStage::Vertex),
        ("point_shadow", ShaderStage::Geometry),
        ("point_shadow", ShaderStage::Fragment),
        ("fullscreen", ShaderStage::Vertex),
        ("composition", ShaderStage::Fragment),
        ("light_volume", ShaderStage::Vertex),
        ("light_volume", ShaderStage::Fragment),
        ("bloom", ShaderStage::Fragment),
        ("post", ShaderStage::Fragment),
        ("irradiance", ShaderStage::Fragment),
        ("prefilter", ShaderStage::Fragment),
        ("brdf", ShaderStage::Fragment),
    ];

    pub fn load(device: &Arc<Device>, library: &ShaderLibrary) -> RenderResult<Self> {
        use ShaderStage::{Fragment, Geometry, Vertex};
        let shaders = Self {
            gbuffer_vert: load(device, library, "gbuffer", Vertex)?,
            gbuffer_frag: load(device, library, "gbuffer", Fragment)?,
            directional_shadow_vert: load(device, library, "directional_shadow", Vertex)?,
            point_shadow_vert: load(device, library, "point_shadow", Vertex)?,
            point_shadow_geom: load(device, library, "point_shadow", Geometry)?,
            point_shadow_frag: load(device, library, "point_shadow", Fragment)?,
            fullscreen_vert: load(device, library, "fullscreen", Vertex)?,
            composition_frag: load(device, library, "composition", Fragment)?,
            light_volume_vert: load(device, library, "light_volume", Vertex)?,
            light_volume_frag: load(device, library, "light_volume", Fragment)?,
            bloom_frag: load(device, library, "bloom", Fragment)?,
            post_frag: load(device, library, "post", Fragment)?,
            irradiance_frag: load(device, library, "irradiance", Fragment)?,
            prefilter_frag: load(device, library, "prefilter", Fragment)?,
            brdf_frag: load(device, library, "brdf", Fragment)?,
        };
        info!("Loaded {} shader modules", Self::FILES.len());
        Ok(shaders)
    }
}

/// Push constant stages of the point shadow pipeline.
pub const SHADOW_PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);
/// Push constant stages of the light volume pipeline.
pub const LIGHT_VOLUME_PUSH_STAGES: vk::ShaderStageFlags = SHADOW_PUSH_STAGES;

/// Set layouts, in set-index order, of each pipeline layout.
pub mod sets {
    use crate::bindings::BindingShape::{self, *};

    pub const GBUFFER: &[BindingShape] = &[SceneUniform, Material];
    pub const DIRECTIONAL_SHADOW: &[BindingShape] = &[];
    pub const POINT_SHADOW: &[BindingShape] = &[ShadowFaces];
    /// The ambient pass binds sets 0 to 2; each light volume adds its shadow
    /// cube at set 3.
    pub const COMPOSITION: &[BindingShape] =
        &[SceneUniform, GeometrySampling, Environment, SingleTexture];
    pub const BLOOM: &[BindingShape] = &[SingleTexture];
    /// Lit color, then blurred bloom.
    pub const POST: &[BindingShape] = &[SingleTexture, SingleTexture];
    pub const ENVIRONMENT: &[BindingShape] = &[SingleTexture];
}

/// Pipeline layouts of every pass.
pub struct PipelineLayouts {
    pub gbuffer: PipelineLayout,
    pub directional_shadow: PipelineLayout,
    pub point_shadow: PipelineLayout,
    pub composition: PipelineLayout,
    pub bloom: PipelineLayout,
    pub post: PipelineLayout,
    pub environment: PipelineLayout,
}

impl PipelineLayouts {
    pub fn new(device: &Arc<Device>, bindings: &BindingLayouts) -> RhiResult<Self> {
        let layout = |shapes: &[BindingShape], ranges: &[vk::PushConstantRange]| {
            let handles: Vec<vk::DescriptorSetLayout> =
                shapes.iter().map(|shape| bindings.get(*shape)).collect();
            PipelineLayout::new(device.clone(), &handles, ranges)
        };
        let fragment = vk::ShaderStageFlags::FRAGMENT;

        Ok(Self {
            gbuffer: layout(
                sets::GBUFFER,
                &[push_constant_range::<ModelPush>(vk::ShaderStageFlags::VERTEX)],
            )?,
            directional_shadow: layout(
                sets::DIRECTIONAL_SHADOW,
                &[push_constant_range::<DirectionalPush>(vk::ShaderStageFlags::VERTEX)],
            )?,
            point_shadow: layout(
                sets::POINT_SHADOW,
                &[push_constant_range::<ShadowPush>(SHADOW_PUSH_STAGES)],
            )?,
            composition: layout(
                sets::COMPOSITION,
                &[push_constant_range::<LightVolumePush>(LIGHT_VOLUME_PUSH_STAGES)],
            )?,
            bloom: layout(sets::BLOOM, &[push_constant_range::<BlurPush>(fragment)])?,
            post: layout(sets::POST, &[push_constant_range::<PostPush>(fragment)])?,
            environment: layout(
                sets::ENVIRONMENT,
                &[push_constant_range::<EnvironmentPush>(fragment)],
            )?,
        })
    }
}

/// Attachment descriptions for a stage writing `shape`.
///
/// Colors are sampled by a later pass, except the surface, which is
/// presented. Shadow depth is sampled; G-buffer and composition depth is
/// only tested against.
pub fn attachment_descs(
    shape: AttachmentShape,
    surface_format: vk::Format,
) -> (Vec<AttachmentDesc>, Option<AttachmentDesc>) {
    let colors = shape
        .color_formats(surface_format)
        .into_iter()
        .map(|format| match shape {
            AttachmentShape::Surface => AttachmentDesc::presented(format),
            _ => AttachmentDesc::sampled_color(format),
        })
        .collect();
    let depth = shape.depth_format().map(|format| match shape {
        AttachmentShape::DepthOnly | AttachmentShape::DepthCube => {
            AttachmentDesc::sampled_depth(format)
        }
        _ => AttachmentDesc::transient_depth(format),
    });
    (colors, depth)
}

/// Builds the render pass of a stage writing `shape`.
///
/// `sampled_surface` declares a surface-shaped pass whose target is sampled
/// afterwards rather than presented, as for pre-filtered cubemap faces.
pub fn build_render_pass(
    device: &Arc<Device>,
    name: &'static str,
    shape: AttachmentShape,
    surface_format: vk::Format,
    sampled_surface: bool,
) -> RhiResult<RenderPass> {
    let (mut colors, depth) = attachment_descs(shape, surface_format);
    if sampled_surface {
        colors = colors
            .into_iter()
            .map(|c| AttachmentDesc::sampled_color(c.format))
            .collect();
    }

    let mut builder = colors
        .into_iter()
        .fold(RenderPassBuilder::new(name), RenderPassBuilder::color)
        .dependency(SubpassDependency::external_to_attachments())
        .dependency(SubpassDependency::attachments_to_fragment_read());
    if let Some(depth) = depth {
        builder = builder.depth(depth);
    }
    builder.build(device.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_file_names() {
        assert_eq!(
            shader_file_name("point_shadow", ShaderStage::Geometry),
            "point_shadow.geom.spv"
        );
        assert_eq!(
            shader_file_name("gbuffer", ShaderStage::Vertex),
            "gbuffer.vert.spv"
        );
    }

    #[test]
    fn test_shader_files_are_unique() {
        let mut names: Vec<String> = Shaders::FILES
            .iter()
            .map(|(name, stage)| shader_file_name(name, *stage))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Shaders::FILES.len());
    }

    #[test]
    fn test_surface_attachment_is_presented() {
        let (colors, depth) =
            attachment_descs(AttachmentShape::Surface, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(depth.is_none());
    }

    #[test]
    fn test_shadow_depth_is_sampled() {
        for shape in [AttachmentShape::DepthOnly, AttachmentShape::DepthCube] {
            let (colors, depth) = attachment_descs(shape, vk::Format::UNDEFINED);
            assert!(colors.is_empty());
            assert_eq!(
                depth.map(|d| d.final_layout),
                Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
            );
        }
    }

    #[test]
    fn test_gbuffer_colors_are_sampled() {
        let (colors, depth) = attachment_descs(AttachmentShape::GBuffer, vk::Format::UNDEFINED);
        assert_eq!(colors.len(), 4);
        assert!(colors
            .iter()
            .all(|c| c.final_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(
            depth.map(|d| d.final_layout),
            Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn test_composition_volumes_bind_shadow_last() {
        assert_eq!(sets::COMPOSITION.len(), 4);
        assert_eq!(sets::COMPOSITION[3], BindingShape::SingleTexture);
    }
}
