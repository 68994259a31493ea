//! Shadow maps: one depth cube per point light slot and a directional map.
//!
//! A point light's cube is rendered in a single layered pass. The geometry
//! stage emits each triangle once per face, selecting the face with
//! `gl_Layer` and transforming it with that face's matrix from the light's
//! [`ShadowFacesBlock`]. The fragment stage writes linear distance divided by
//! the far plane.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::debug;

use penumbra_core::config::{
    DIRECTIONAL_SHADOW_RESOLUTION, FRAMES_IN_FLIGHT, MAX_LIGHTS, POINT_SHADOW_RESOLUTION,
};
use penumbra_rhi::buffer::{Buffer, BufferUsage};
use penumbra_rhi::command::CommandPool;
use penumbra_rhi::descriptor::DescriptorWriter;
use penumbra_rhi::device::Device;
use penumbra_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline};
use penumbra_rhi::vertex::Vertex;
use penumbra_scene::{DrawCall, PointLight, SceneUniforms};

use crate::assets::MeshRegistry;
use crate::attachments::{AttachmentCollection, AttachmentShape};
use crate::bindings::{repoint_image_set, BindingLayouts, BindingShape, DescriptorPools, PerFrame};
use crate::error::RenderResult;
use crate::pipelines::{build_render_pass, PipelineLayouts, Shaders, SHADOW_PUSH_STAGES};
use crate::render_stage::{RenderStage, RenderTargets};
use crate::ubo::{DirectionalPush, ShadowFacesBlock, ShadowPush};

/// Near plane of every cube face.
pub const CUBE_NEAR: f32 = 0.1;
/// Smallest far plane, for lights too dim to reach past the near plane.
pub const MIN_CUBE_FAR: f32 = 1.0;

/// Forward and up vectors of the faces, in +X, -X, +Y, -Y, +Z, -Z order.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View-projection of each cube face seen from `position`.
///
/// Each matrix is 90° wide with aspect 1 and is Y-negated, so that under the
/// flipped viewport of every render stage the rows of each face land in
/// cube-sampling orientation.
pub fn cube_face_view_projections(position: Vec3, far: f32) -> [Mat4; 6] {
    let projection = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::perspective_rh(90f32.to_radians(), 1.0, CUBE_NEAR, far);
    CUBE_FACES.map(|(forward, up)| projection * Mat4::look_at_rh(position, position + forward, up))
}

/// Far plane of a light's cube: its radius, never closer than
/// [`MIN_CUBE_FAR`].
pub fn far_plane(light: &PointLight) -> f32 {
    light.radius().max(MIN_CUBE_FAR)
}

/// Faces block of a light.
pub fn shadow_faces(light: &PointLight) -> ShadowFacesBlock {
    let far = far_plane(light);
    ShadowFacesBlock {
        faces: cube_face_view_projections(light.position, far),
        position_far: light.position.extend(far),
    }
}

fn clear_depth() -> [vk::ClearValue; 1] {
    [vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    }]
}

/// Depth cube of one light slot, one per frame slot.
pub struct PointShadowCaster {
    stage: RenderStage,
    faces: PerFrame<Buffer>,
    face_sets: PerFrame<vk::DescriptorSet>,
    /// Samples this slot's cube during composition.
    sampling_sets: PerFrame<vk::DescriptorSet>,
}

impl PointShadowCaster {
    fn new(
        device: &Arc<Device>,
        command_pool: &Arc<CommandPool>,
        layouts: &BindingLayouts,
        pools: &mut DescriptorPools,
        sampler: vk::Sampler,
    ) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: POINT_SHADOW_RESOLUTION,
            height: POINT_SHADOW_RESOLUTION,
        };
        let pass = build_render_pass(
            device,
            "point_shadow",
            AttachmentShape::DepthCube,
            vk::Format::UNDEFINED,
            false,
        )?;
        let attachments = (0..FRAMES_IN_FLIGHT)
            .map(|_| AttachmentCollection::new(device, AttachmentShape::DepthCube, extent))
            .collect::<Result<Vec<_>, _>>()?;
        let stage = RenderStage::new(
            device,
            command_pool,
            pass,
            RenderTargets::PerFrameSlot,
            attachments,
        )?;

        let faces = PerFrame::try_new(|_| {
            Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                ShadowFacesBlock::SIZE as vk::DeviceSize,
            )
        })?;
        let face_sets = pools.shadow_faces.allocate_n(
            layouts.get(BindingShape::ShadowFaces),
            FRAMES_IN_FLIGHT,
        )?;
        let sampling_sets = pools.sampling.allocate_n(
            layouts.get(BindingShape::SingleTexture),
            FRAMES_IN_FLIGHT,
        )?;

        for slot in 0..FRAMES_IN_FLIGHT {
            DescriptorWriter::new()
                .uniform_buffer(0, faces[slot].handle())
                .write(device, face_sets[slot]);
            if let Some(view) = stage.attachments(slot).and_then(AttachmentCollection::sampled_depth) {
                repoint_image_set(
                    device,
                    sampling_sets[slot],
                    sampler,
                    &[(view, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)],
                );
            }
        }

        Ok(Self {
            stage,
            faces,
            face_sets: PerFrame::from_fn(|slot| face_sets[slot]),
            sampling_sets: PerFrame::from_fn(|slot| sampling_sets[slot]),
        })
    }

    /// Writes the light's face matrices for `slot`.
    pub fn update(&self, slot: usize, light: &PointLight) -> RenderResult<()> {
        self.faces[slot].write(&shadow_faces(light))?;
        Ok(())
    }

    /// Records the cube pass of `light` for `slot`.
    pub fn record(
        &mut self,
        slot: usize,
        light: &PointLight,
        pipeline: &Pipeline,
        layouts: &PipelineLayouts,
        draws: &[DrawCall],
        meshes: &MeshRegistry,
    ) -> RenderResult<()> {
        let position_far = light.position.extend(far_plane(light));
        let face_set = self.face_sets[slot];

        self.stage.begin_commands(slot)?;
        let cmd = self.stage.begin_pass(slot, slot, &clear_depth())?;
        cmd.bind_pipeline(pipeline.handle());
        cmd.bind_descriptor_sets(layouts.point_shadow.handle(), 0, &[face_set]);
        for draw in draws {
            let Some(mesh) = meshes.get(draw.mesh) else {
                continue;
            };
            cmd.push_constants(
                layouts.point_shadow.handle(),
                SHADOW_PUSH_STAGES,
                &ShadowPush {
                    model: draw.transform,
                    position_far,
                },
            );
            mesh.draw(cmd);
        }
        self.stage.end_pass(slot)?;
        self.stage.end_commands(slot)?;
        Ok(())
    }

    pub fn stage(&self) -> &RenderStage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut RenderStage {
        &mut self.stage
    }

    /// Set sampling the cube written in `slot`.
    pub fn sampling_set(&self, slot: usize) -> vk::DescriptorSet {
        self.sampling_sets[slot]
    }
}

/// Every point light slot's caster and the shared cube pipeline.
pub struct PointShadows {
    pipeline: Pipeline,
    casters: Vec<PointShadowCaster>,
}

impl PointShadows {
    pub fn new(
        device: &Arc<Device>,
        command_pool: &Arc<CommandPool>,
        binding_layouts: &BindingLayouts,
        pools: &mut DescriptorPools,
        shaders: &Shaders,
        layouts: &PipelineLayouts,
        sampler: vk::Sampler,
    ) -> RenderResult<Self> {
        let casters = (0..MAX_LIGHTS)
            .map(|_| PointShadowCaster::new(device, command_pool, binding_layouts, pools, sampler))
            .collect::<RenderResult<Vec<_>>>()?;

        // Every caster's pass has the same formats, so one pipeline fits all.
        let pipeline = GraphicsPipelineBuilder::new(casters[0].stage.pass())
            .vertex_shader(&shaders.point_shadow_vert)
            .geometry_shader(&shaders.point_shadow_geom)
            .fragment_shader(&shaders.point_shadow_frag)
            .vertex_input(
                Vertex::binding_description(),
                &Vertex::position_attribute_description(),
            )
            .cull_mode(CullMode::None)
            .build(device.clone(), &layouts.point_shadow)?;

        debug!(
            "Allocated {} point shadow casters at {}²",
            casters.len(),
            POINT_SHADOW_RESOLUTION
        );
        Ok(Self { pipeline, casters })
    }

    pub fn update(&self, slot: usize, lights: &[PointLight]) -> RenderResult<()> {
        for (caster, light) in self.casters.iter().zip(lights) {
            caster.update(slot, light)?;
        }
        Ok(())
    }

    pub fn record(
        &mut self,
        index: usize,
        slot: usize,
        light: &PointLight,
        layouts: &PipelineLayouts,
        draws: &[DrawCall],
        meshes: &MeshRegistry,
    ) -> RenderResult<()> {
        let pipeline = &self.pipeline;
        self.casters[index].record(slot, light, pipeline, layouts, draws, meshes)
    }

    pub fn caster(&self, index: usize) -> &PointShadowCaster {
        &self.casters[index]
    }

    pub fn caster_mut(&mut self, index: usize) -> &mut PointShadowCaster {
        &mut self.casters[index]
    }
}

/// Directional shadow map, one per frame slot.
pub struct DirectionalShadow {
    pipeline: Pipeline,
    stage: RenderStage,
}

impl DirectionalShadow {
    pub fn new(
        device: &Arc<Device>,
        command_pool: &Arc<CommandPool>,
        shaders: &Shaders,
        layouts: &PipelineLayouts,
    ) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: DIRECTIONAL_SHADOW_RESOLUTION,
            height: DIRECTIONAL_SHADOW_RESOLUTION,
        };
        let pass = build_render_pass(
            device,
            "directional_shadow",
            AttachmentShape::DepthOnly,
            vk::Format::UNDEFINED,
            false,
        )?;
        let attachments = (0..FRAMES_IN_FLIGHT)
            .map(|_| AttachmentCollection::new(device, AttachmentShape::DepthOnly, extent))
            .collect::<Result<Vec<_>, _>>()?;
        let stage = RenderStage::new(
            device,
            command_pool,
            pass,
            RenderTargets::PerFrameSlot,
            attachments,
        )?;

        let pipeline = GraphicsPipelineBuilder::new(stage.pass())
            .vertex_shader(&shaders.directional_shadow_vert)
            .vertex_input(
                Vertex::binding_description(),
                &Vertex::position_attribute_description(),
            )
            .cull_mode(CullMode::None)
            .depth_bias(1.25, 1.75)
            .build(device.clone(), &layouts.directional_shadow)?;

        Ok(Self { pipeline, stage })
    }

    pub fn record(
        &mut self,
        slot: usize,
        scene: &SceneUniforms,
        layouts: &PipelineLayouts,
        draws: &[DrawCall],
        meshes: &MeshRegistry,
    ) -> RenderResult<()> {
        self.stage.begin_commands(slot)?;
        let cmd = self.stage.begin_pass(slot, slot, &clear_depth())?;
        cmd.bind_pipeline(self.pipeline.handle());
        for draw in draws {
            let Some(mesh) = meshes.get(draw.mesh) else {
                continue;
            };
            cmd.push_constants(
                layouts.directional_shadow.handle(),
                vk::ShaderStageFlags::VERTEX,
                &DirectionalPush {
                    light_space: scene.light_space,
                    model: draw.transform,
                },
            );
            mesh.draw(cmd);
        }
        self.stage.end_pass(slot)?;
        self.stage.end_commands(slot)?;
        Ok(())
    }

    /// Depth view written in `slot`, for the scene set.
    pub fn sampled_view(&self, slot: usize) -> Option<vk::ImageView> {
        self.stage
            .attachments(slot)
            .and_then(AttachmentCollection::sampled_depth)
    }

    pub fn stage(&self) -> &RenderStage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut RenderStage {
        &mut self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(m: Mat4, p: Vec3) -> Vec3 {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn test_each_face_looks_down_its_axis() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let faces = cube_face_view_projections(position, 20.0);
        for (matrix, (forward, _)) in faces.iter().zip(CUBE_FACES) {
            let ndc = project(*matrix, position + forward * 5.0);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{forward:?}: {ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn test_faces_cover_90_degrees() {
        let faces = cube_face_view_projections(Vec3::ZERO, 20.0);
        // A point on the diagonal between +X and +Z sits on both face edges.
        let edge = project(faces[0], Vec3::new(5.0, 0.0, 5.0));
        assert!((edge.x.abs() - 1.0).abs() < 1e-4, "{edge:?}");
    }

    #[test]
    fn test_face_rows_match_cube_sampling() {
        // Under a flipped viewport, NDC +Y is the first row. The first row of
        // the +X face is toward +Y.
        let faces = cube_face_view_projections(Vec3::ZERO, 20.0);
        let up = project(faces[0], Vec3::new(5.0, 1.0, 0.0));
        assert!(up.y > 0.0, "{up:?}");
    }

    #[test]
    fn test_far_plane_is_radius() {
        let light = PointLight::new(Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        assert!((far_plane(&light) - 10.119).abs() < 1e-3);
        let dark = PointLight::new(Vec3::ZERO, Vec3::ZERO);
        assert_eq!(far_plane(&dark), MIN_CUBE_FAR);
    }

    #[test]
    fn test_shadow_faces_block() {
        let light = PointLight::new(Vec3::new(4.0, 1.0, 0.0), Vec3::ONE);
        let block = shadow_faces(&light);
        assert_eq!(block.position_far.truncate(), light.position);
        assert_eq!(block.position_far.w, far_plane(&light));
        assert_eq!(block.faces, cube_face_view_projections(light.position, far_plane(&light)));
    }
}
