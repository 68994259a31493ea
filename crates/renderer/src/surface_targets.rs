//! Everything sized or formatted after the swapchain.
//!
//! [`SurfaceTargets`] is rebuilt as a whole when the surface changes: the
//! old arena is dropped, then a new one is built at the new extent. The
//! descriptor sets that sample these targets live in [`SurfaceSets`]; they
//! survive the rebuild and are repointed at the new views.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use penumbra_core::config::FRAMES_IN_FLIGHT;
use penumbra_rhi::command::CommandPool;
use penumbra_rhi::device::Device;
use penumbra_rhi::pipeline::{ColorBlend, CullMode, GraphicsPipelineBuilder, Pipeline};
use penumbra_rhi::vertex::Vertex;
use penumbra_rhi::{RhiError, RhiResult};
use penumbra_scene::{DrawCall, PointLight};

use crate::assets::{GpuMesh, MaterialRegistry, MeshRegistry};
use crate::attachments::{AttachmentCollection, AttachmentShape};
use crate::bindings::{repoint_image_set, BindingLayouts, BindingShape, BoundedPool, PerFrame};
use crate::error::{RenderError, RenderResult};
use crate::pipelines::{build_render_pass, PipelineLayouts, Shaders, LIGHT_VOLUME_PUSH_STAGES};
use crate::render_stage::{RenderStage, RenderTargets};
use crate::ubo::{BlurPush, LightVolumePush, ModelPush, PostPush};

/// Weight of the blurred bloom added before tone mapping.
pub const BLOOM_STRENGTH: f32 = 0.6;

/// Name, attachment shape, formats and target policy of one surface stage.
pub type StageSignature = (&'static str, AttachmentShape, Vec<vk::Format>, RenderTargets);

/// The surface-derived stages: shape, formats and target policy of each, in
/// frame order.
///
/// Depends only on the surface format, so a resize at a fixed format leaves
/// it unchanged.
pub fn surface_signature(surface_format: vk::Format) -> Vec<StageSignature> {
    [
        ("gbuffer", AttachmentShape::GBuffer, RenderTargets::PerFrameSlot),
        ("composition", AttachmentShape::Composition, RenderTargets::PerFrameSlot),
        ("bloom_horizontal", AttachmentShape::Bloom, RenderTargets::PerFrameSlot),
        ("bloom_vertical", AttachmentShape::Bloom, RenderTargets::PerFrameSlot),
        ("post", AttachmentShape::Surface, RenderTargets::PerSwapchainImage),
    ]
    .into_iter()
    .map(|(name, shape, targets)| (name, shape, shape.formats(surface_format), targets))
    .collect()
}

/// Checks a built arena against the layout `surface_format` dictates.
///
/// # Errors
///
/// [`RenderError::Surface`] naming the first stage that differs.
pub fn verify_signature(built: &[StageSignature], surface_format: vk::Format) -> RenderResult<()> {
    let expected = surface_signature(surface_format);
    if built.len() != expected.len() {
        return Err(RenderError::Surface(format!(
            "surface arena has {} stages, expected {}",
            built.len(),
            expected.len()
        )));
    }
    match built.iter().zip(&expected).find(|(b, e)| b != e) {
        Some((b, e)) => Err(RenderError::Surface(format!(
            "stage '{}' built as {:?} {:?} {:?}, expected '{}' {:?} {:?} {:?}",
            b.0, b.1, b.2, b.3, e.0, e.1, e.2, e.3
        ))),
        None => Ok(()),
    }
}

fn clears(colors: usize, depth: bool) -> Vec<vk::ClearValue> {
    let mut values = vec![
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        };
        colors
    ];
    if depth {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    values
}

fn per_slot_stage(
    device: &Arc<Device>,
    command_pool: &Arc<CommandPool>,
    name: &'static str,
    shape: AttachmentShape,
    extent: vk::Extent2D,
) -> RhiResult<RenderStage> {
    let pass = build_render_pass(device, name, shape, vk::Format::UNDEFINED, false)?;
    let attachments = (0..FRAMES_IN_FLIGHT)
        .map(|_| AttachmentCollection::new(device, shape, extent))
        .collect::<RhiResult<Vec<_>>>()?;
    RenderStage::new(device, command_pool, pass, RenderTargets::PerFrameSlot, attachments)
}

/// Stages and pipelines of the surface-sized passes.
///
/// Pipelines are declared first so they drop before the stages; stages
/// drop in reverse frame order.
pub struct SurfaceTargets {
    gbuffer_pipeline: Pipeline,
    ambient_pipeline: Pipeline,
    light_volume_pipeline: Pipeline,
    bloom_pipeline: Pipeline,
    post_pipeline: Pipeline,
    post: RenderStage,
    bloom_vertical: RenderStage,
    bloom_horizontal: RenderStage,
    composition: RenderStage,
    gbuffer: RenderStage,
    extent: vk::Extent2D,
    surface_format: vk::Format,
}

impl SurfaceTargets {
    pub fn new(
        device: &Arc<Device>,
        command_pool: &Arc<CommandPool>,
        shaders: &Shaders,
        layouts: &PipelineLayouts,
        surface_format: vk::Format,
        extent: vk::Extent2D,
        swapchain_views: &[vk::ImageView],
    ) -> RhiResult<Self> {
        let gbuffer = per_slot_stage(device, command_pool, "gbuffer", AttachmentShape::GBuffer, extent)?;
        let composition = per_slot_stage(
            device,
            command_pool,
            "composition",
            AttachmentShape::Composition,
            extent,
        )?;
        let bloom_horizontal = per_slot_stage(
            device,
            command_pool,
            "bloom_horizontal",
            AttachmentShape::Bloom,
            extent,
        )?;
        let bloom_vertical = per_slot_stage(
            device,
            command_pool,
            "bloom_vertical",
            AttachmentShape::Bloom,
            extent,
        )?;
        let post = RenderStage::new(
            device,
            command_pool,
            build_render_pass(device, "post", AttachmentShape::Surface, surface_format, false)?,
            RenderTargets::PerSwapchainImage,
            swapchain_views
                .iter()
                .map(|view| AttachmentCollection::borrowed(*view, surface_format, extent))
                .collect(),
        )?;

        let gbuffer_pipeline = GraphicsPipelineBuilder::new(gbuffer.pass())
            .vertex_shader(&shaders.gbuffer_vert)
            .fragment_shader(&shaders.gbuffer_frag)
            .vertex_input(Vertex::binding_description(), &Vertex::attribute_descriptions())
            .cull_mode(CullMode::Back)
            .build(device.clone(), &layouts.gbuffer)?;
        let ambient_pipeline = GraphicsPipelineBuilder::new(composition.pass())
            .vertex_shader(&shaders.fullscreen_vert)
            .fragment_shader(&shaders.composition_frag)
            .cull_mode(CullMode::None)
            .depth_test_enable(false)
            .depth_write_enable(false)
            .build(device.clone(), &layouts.composition)?;
        // Back faces only, so a camera inside a volume is still lit.
        let light_volume_pipeline = GraphicsPipelineBuilder::new(composition.pass())
            .vertex_shader(&shaders.light_volume_vert)
            .fragment_shader(&shaders.light_volume_frag)
            .vertex_input(
                Vertex::binding_description(),
                &Vertex::position_attribute_description(),
            )
            .cull_mode(CullMode::Front)
            .depth_test_enable(false)
            .depth_write_enable(false)
            .blend_all(ColorBlend::Additive)
            .build(device.clone(), &layouts.composition)?;
        // Both blur passes have identical formats and share a pipeline.
        let bloom_pipeline = GraphicsPipelineBuilder::new(bloom_horizontal.pass())
            .vertex_shader(&shaders.fullscreen_vert)
            .fragment_shader(&shaders.bloom_frag)
            .cull_mode(CullMode::None)
            .build(device.clone(), &layouts.bloom)?;
        let post_pipeline = GraphicsPipelineBuilder::new(post.pass())
            .vertex_shader(&shaders.fullscreen_vert)
            .fragment_shader(&shaders.post_frag)
            .cull_mode(CullMode::None)
            .build(device.clone(), &layouts.post)?;

        info!(
            "Built surface targets: {}x{}, {} swapchain image(s), format {:?}",
            extent.width,
            extent.height,
            swapchain_views.len(),
            surface_format
        );

        Ok(Self {
            gbuffer_pipeline,
            ambient_pipeline,
            light_volume_pipeline,
            bloom_pipeline,
            post_pipeline,
            post,
            bloom_vertical,
            bloom_horizontal,
            composition,
            gbuffer,
            extent,
            surface_format,
        })
    }

    /// Fills the G-buffer with every queued draw.
    pub fn record_geometry(
        &mut self,
        slot: usize,
        scene_set: vk::DescriptorSet,
        layouts: &PipelineLayouts,
        draws: &[DrawCall],
        meshes: &MeshRegistry,
        materials: &MaterialRegistry,
    ) -> RenderResult<()> {
        let layout = layouts.gbuffer.handle();
        let stage = &mut self.gbuffer;
        stage.begin_commands(slot)?;
        let cmd = stage.begin_pass(slot, slot, &clears(4, true))?;
        cmd.bind_pipeline(self.gbuffer_pipeline.handle());
        for draw in draws {
            let Some(mesh) = meshes.get(draw.mesh) else {
                continue;
            };
            let Some(material_set) = materials.set(mesh.material()) else {
                continue;
            };
            cmd.bind_descriptor_sets(layout, 0, &[scene_set, material_set]);
            cmd.push_constants(
                layout,
                vk::ShaderStageFlags::VERTEX,
                &ModelPush::new(draw.transform),
            );
            mesh.draw(cmd);
        }
        stage.end_pass(slot)?;
        stage.end_commands(slot)?;
        Ok(())
    }

    /// Lights the G-buffer: a fullscreen ambient and directional pass, then
    /// one additive volume per light, each with its shadow cube.
    #[allow(clippy::too_many_arguments)]
    pub fn record_composition(
        &mut self,
        slot: usize,
        scene_set: vk::DescriptorSet,
        gbuffer_set: vk::DescriptorSet,
        environment_set: vk::DescriptorSet,
        layouts: &PipelineLayouts,
        lights: &[PointLight],
        shadow_set: impl Fn(usize) -> vk::DescriptorSet,
        volume: &GpuMesh,
    ) -> RenderResult<()> {
        let layout = layouts.composition.handle();
        let stage = &mut self.composition;
        stage.begin_commands(slot)?;
        let cmd = stage.begin_pass(slot, slot, &clears(2, true))?;

        cmd.bind_pipeline(self.ambient_pipeline.handle());
        cmd.bind_descriptor_sets(layout, 0, &[scene_set, gbuffer_set, environment_set]);
        cmd.draw(3);

        if !lights.is_empty() {
            cmd.bind_pipeline(self.light_volume_pipeline.handle());
            for (index, light) in lights.iter().enumerate() {
                cmd.bind_descriptor_sets(layout, 3, &[shadow_set(index)]);
                cmd.push_constants(layout, LIGHT_VOLUME_PUSH_STAGES, &LightVolumePush::from(light));
                volume.draw(cmd);
            }
        }
        stage.end_pass(slot)?;
        stage.end_commands(slot)?;
        Ok(())
    }

    /// One direction of the separable bloom blur.
    pub fn record_bloom(
        &mut self,
        slot: usize,
        horizontal: bool,
        input_set: vk::DescriptorSet,
        layouts: &PipelineLayouts,
    ) -> RenderResult<()> {
        let layout = layouts.bloom.handle();
        let (stage, push) = if horizontal {
            (&mut self.bloom_horizontal, BlurPush::HORIZONTAL)
        } else {
            (&mut self.bloom_vertical, BlurPush::VERTICAL)
        };
        stage.begin_commands(slot)?;
        let cmd = stage.begin_pass(slot, slot, &clears(1, false))?;
        cmd.bind_pipeline(self.bloom_pipeline.handle());
        cmd.bind_descriptor_sets(layout, 0, &[input_set]);
        cmd.push_constants(layout, vk::ShaderStageFlags::FRAGMENT, &push);
        cmd.draw(3);
        stage.end_pass(slot)?;
        stage.end_commands(slot)?;
        Ok(())
    }

    /// Tone-maps lit color plus bloom into swapchain image `image_index`.
    pub fn record_post(
        &mut self,
        slot: usize,
        image_index: u32,
        color_set: vk::DescriptorSet,
        bloom_set: vk::DescriptorSet,
        layouts: &PipelineLayouts,
        exposure: f32,
    ) -> RenderResult<()> {
        let layout = layouts.post.handle();
        let stage = &mut self.post;
        stage.begin_commands(slot)?;
        let cmd = stage.begin_pass(slot, image_index as usize, &clears(1, false))?;
        cmd.bind_pipeline(self.post_pipeline.handle());
        cmd.bind_descriptor_sets(layout, 0, &[color_set, bloom_set]);
        cmd.push_constants(
            layout,
            vk::ShaderStageFlags::FRAGMENT,
            &PostPush {
                exposure,
                bloom_strength: BLOOM_STRENGTH,
                _padding: [0.0; 2],
            },
        );
        cmd.draw(3);
        stage.end_pass(slot)?;
        stage.end_commands(slot)?;
        Ok(())
    }

    pub fn gbuffer(&self) -> &RenderStage {
        &self.gbuffer
    }

    pub fn composition(&self) -> &RenderStage {
        &self.composition
    }

    pub fn bloom_horizontal(&self) -> &RenderStage {
        &self.bloom_horizontal
    }

    pub fn bloom_vertical(&self) -> &RenderStage {
        &self.bloom_vertical
    }

    pub fn post(&self) -> &RenderStage {
        &self.post
    }

    pub fn stage_mut(&mut self, name: SurfaceStage) -> &mut RenderStage {
        match name {
            SurfaceStage::Geometry => &mut self.gbuffer,
            SurfaceStage::Composition => &mut self.composition,
            SurfaceStage::BloomHorizontal => &mut self.bloom_horizontal,
            SurfaceStage::BloomVertical => &mut self.bloom_vertical,
            SurfaceStage::Post => &mut self.post,
        }
    }

    pub fn stage(&self, name: SurfaceStage) -> &RenderStage {
        match name {
            SurfaceStage::Geometry => &self.gbuffer,
            SurfaceStage::Composition => &self.composition,
            SurfaceStage::BloomHorizontal => &self.bloom_horizontal,
            SurfaceStage::BloomVertical => &self.bloom_vertical,
            SurfaceStage::Post => &self.post,
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn surface_format(&self) -> vk::Format {
        self.surface_format
    }

    /// Shapes, formats and target policies actually built.
    pub fn signature(&self) -> Vec<StageSignature> {
        SurfaceStage::ALL
            .iter()
            .map(|name| {
                let stage = self.stage(*name);
                let collection = stage.attachments(0);
                (
                    stage.name(),
                    collection.map_or(AttachmentShape::Surface, AttachmentCollection::shape),
                    collection.map(|c| c.formats().to_vec()).unwrap_or_default(),
                    stage.targets(),
                )
            })
            .collect()
    }
}

/// The stages owned by [`SurfaceTargets`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStage {
    Geometry,
    Composition,
    BloomHorizontal,
    BloomVertical,
    Post,
}

impl SurfaceStage {
    pub const ALL: [SurfaceStage; 5] = [
        SurfaceStage::Geometry,
        SurfaceStage::Composition,
        SurfaceStage::BloomHorizontal,
        SurfaceStage::BloomVertical,
        SurfaceStage::Post,
    ];
}

/// Sets sampling surface targets, repointed after every rebuild.
pub struct SurfaceSets {
    /// G-buffer colors, read by composition.
    pub gbuffer: PerFrame<vk::DescriptorSet>,
    /// Composition bright output, read by the horizontal blur.
    pub bright: PerFrame<vk::DescriptorSet>,
    /// Horizontal blur output, read by the vertical blur.
    pub blurred_horizontal: PerFrame<vk::DescriptorSet>,
    /// Composition color, read by post.
    pub lit: PerFrame<vk::DescriptorSet>,
    /// Vertical blur output, read by post.
    pub bloom: PerFrame<vk::DescriptorSet>,
}

impl SurfaceSets {
    pub fn new(layouts: &BindingLayouts, pool: &mut BoundedPool) -> RenderResult<Self> {
        let mut per_frame = |shape: BindingShape| -> RenderResult<PerFrame<vk::DescriptorSet>> {
            let sets = pool.allocate_n(layouts.get(shape), FRAMES_IN_FLIGHT)?;
            Ok(PerFrame::from_fn(|slot| sets[slot]))
        };
        Ok(Self {
            gbuffer: per_frame(BindingShape::GeometrySampling)?,
            bright: per_frame(BindingShape::SingleTexture)?,
            blurred_horizontal: per_frame(BindingShape::SingleTexture)?,
            lit: per_frame(BindingShape::SingleTexture)?,
            bloom: per_frame(BindingShape::SingleTexture)?,
        })
    }

    /// Points every set at the views of `targets`.
    ///
    /// No set may be in use by a pending submission.
    pub fn repoint(&self, device: &Device, targets: &SurfaceTargets, sampler: vk::Sampler) -> RhiResult<()> {
        let read = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        let color = |stage: &RenderStage, slot: usize, index: usize| {
            stage
                .attachments(slot)
                .and_then(|a| a.sampled_color(index))
                .map(|view| (view, read))
                .ok_or_else(|| {
                    RhiError::ImageError(format!(
                        "{}: no color attachment {} for slot {}",
                        stage.name(),
                        index,
                        slot
                    ))
                })
        };

        for slot in 0..FRAMES_IN_FLIGHT {
            let gbuffer = (0..4)
                .map(|i| color(targets.gbuffer(), slot, i))
                .collect::<RhiResult<Vec<_>>>()?;
            repoint_image_set(device, self.gbuffer[slot], sampler, &gbuffer);
            repoint_image_set(device, self.lit[slot], sampler, &[color(targets.composition(), slot, 0)?]);
            repoint_image_set(device, self.bright[slot], sampler, &[color(targets.composition(), slot, 1)?]);
            repoint_image_set(
                device,
                self.blurred_horizontal[slot],
                sampler,
                &[color(targets.bloom_horizontal(), slot, 0)?],
            );
            repoint_image_set(device, self.bloom[slot], sampler, &[color(targets.bloom_vertical(), slot, 0)?]);
        }
        debug!("Repointed surface sampling sets");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_covers_every_stage() {
        let names: Vec<&str> = surface_signature(vk::Format::B8G8R8A8_SRGB)
            .iter()
            .map(|entry| entry.0)
            .collect();
        assert_eq!(names.len(), SurfaceStage::ALL.len());
        assert_eq!(names[0], "gbuffer");
        assert_eq!(names[4], "post");
    }

    #[test]
    fn test_verify_accepts_matching_arena() {
        let format = vk::Format::B8G8R8A8_SRGB;
        assert!(verify_signature(&surface_signature(format), format).is_ok());
    }

    #[test]
    fn test_verify_rejects_changed_formats() {
        let format = vk::Format::B8G8R8A8_SRGB;
        let mut built = surface_signature(format);
        built[1].2[0] = vk::Format::R8G8B8A8_UNORM;
        let err = verify_signature(&built, format).unwrap_err();
        assert!(matches!(err, RenderError::Surface(ref m) if m.contains("composition")));
    }

    #[test]
    fn test_verify_rejects_stale_surface_format() {
        // Post built for the old surface format after a format change.
        let built = surface_signature(vk::Format::B8G8R8A8_UNORM);
        assert!(verify_signature(&built, vk::Format::B8G8R8A8_SRGB).is_err());
    }

    #[test]
    fn test_verify_rejects_changed_policy_or_missing_stage() {
        let format = vk::Format::B8G8R8A8_SRGB;
        let mut built = surface_signature(format);
        built[4].3 = RenderTargets::PerFrameSlot;
        assert!(verify_signature(&built, format).is_err());

        let mut short = surface_signature(format);
        short.pop();
        assert!(verify_signature(&short, format).is_err());
    }

    #[test]
    fn test_only_post_follows_surface() {
        let a = surface_signature(vk::Format::B8G8R8A8_SRGB);
        let b = surface_signature(vk::Format::R8G8B8A8_UNORM);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.2 == y.2, x.0 != "post", "{}", x.0);
        }
    }

    #[test]
    fn test_only_post_is_per_swapchain_image() {
        for (name, _, _, targets) in surface_signature(vk::Format::B8G8R8A8_SRGB) {
            assert_eq!(targets == RenderTargets::PerSwapchainImage, name == "post");
        }
    }

    #[test]
    fn test_clear_values_match_shapes() {
        assert_eq!(clears(4, true).len(), AttachmentShape::GBuffer.attachment_count());
        assert_eq!(clears(2, true).len(), AttachmentShape::Composition.attachment_count());
        assert_eq!(clears(1, false).len(), AttachmentShape::Bloom.attachment_count());
    }
}
