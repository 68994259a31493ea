//! The Vulkan implementation of [`FrameBackend`].
//!
//! [`DeferredBackend`] owns every GPU object of the renderer. Objects that
//! do not depend on the surface (shadows, environment, assets, pools) are
//! built once; [`SurfaceTargets`] is rebuilt on every surface change.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace};

use penumbra_core::RendererConfig;
use penumbra_core::config::{FRAMES_IN_FLIGHT, MAX_LIGHTS};
use penumbra_resources::{CubeFaces, MaterialTextures, MeshData, ShaderLibrary, primitives};
use penumbra_rhi::buffer::{Buffer, BufferUsage};
use penumbra_rhi::descriptor::DescriptorWriter;
use penumbra_rhi::device::Device;
use penumbra_rhi::sampler::{Sampler, SamplerDesc};
use penumbra_rhi::RhiError;
use penumbra_scene::{LightList, MaterialHandle, MeshHandle, SceneUniforms};

use crate::assets::{GpuMesh, MaterialRegistry, MeshRegistry};
use crate::bindings::{BindingLayouts, BindingShape, DescriptorPools, PerFrame};
use crate::context::{AcquireOutcome, DeviceContext, PresentOutcome};
use crate::environment::EnvironmentMaps;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameSync;
use crate::frame_graph::{PassId, SemaphoreRef, SubmissionBatch};
use crate::orchestrator::{FrameBackend, FrameContext, FrameOrchestrator, SurfaceRebuild};
use crate::pipelines::{PipelineLayouts, Shaders};
use crate::render_stage::{RenderStage, StageSubmission};
use crate::shadow::{DirectionalShadow, PointShadows};
use crate::surface_targets::{verify_signature, SurfaceSets, SurfaceStage, SurfaceTargets};
use crate::ubo::{LightBlock, SceneBlock};

/// Segments of the unit sphere drawn per light volume.
const LIGHT_VOLUME_SECTORS: u32 = 16;
const LIGHT_VOLUME_STACKS: u32 = 12;

/// Owns every GPU resource and performs the work the orchestrator schedules.
///
/// Fields drop in declaration order, after `Drop` waits for the device:
/// surface targets first, the device context last.
pub struct DeferredBackend {
    surface: Option<SurfaceTargets>,
    surface_sets: SurfaceSets,
    frame_sync: FrameSync,
    scene_buffers: PerFrame<Buffer>,
    light_buffers: PerFrame<Buffer>,
    scene_sets: PerFrame<vk::DescriptorSet>,
    directional: DirectionalShadow,
    point_shadows: PointShadows,
    environment: EnvironmentMaps,
    /// Unit sphere scaled to each light's radius.
    light_volume: GpuMesh,
    meshes: MeshRegistry,
    materials: MaterialRegistry,
    material_sampler: Sampler,
    clamp_sampler: Sampler,
    /// Referenced by the scene and shadow sampling sets.
    _shadow_sampler: Sampler,
    pools: DescriptorPools,
    binding_layouts: BindingLayouts,
    pipeline_layouts: PipelineLayouts,
    shaders: Shaders,
    config: RendererConfig,
    context: DeviceContext,
}

impl DeferredBackend {
    /// Brings up the device and every surface-independent resource, filters
    /// `sky` into the environment maps and builds the surface targets.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        config: RendererConfig,
        sky: &CubeFaces,
    ) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };
        let context = DeviceContext::new(display, window, extent, &config)?;
        let device = context.device().clone();
        let command_pool = context.command_pool().clone();

        let shaders = Shaders::load(&device, &ShaderLibrary::from_dir(config.shader_dir.clone()))?;
        let binding_layouts = BindingLayouts::new(&device)?;
        let pipeline_layouts = PipelineLayouts::new(&device, &binding_layouts)?;
        let mut pools = DescriptorPools::new(&device)?;

        let anisotropy = device.limits().max_sampler_anisotropy.min(16.0);
        let material_sampler = Sampler::new(device.clone(), SamplerDesc::linear_repeat(Some(anisotropy)))?;
        let clamp_sampler = Sampler::new(device.clone(), SamplerDesc::linear_clamp())?;
        let shadow_sampler = Sampler::new(device.clone(), SamplerDesc::shadow_clamp())?;

        let frame_sync = FrameSync::new(&device)?;
        let directional = DirectionalShadow::new(&device, &command_pool, &shaders, &pipeline_layouts)?;
        let point_shadows = PointShadows::new(
            &device,
            &command_pool,
            &binding_layouts,
            &mut pools,
            &shaders,
            &pipeline_layouts,
            shadow_sampler.handle(),
        )?;
        let environment = EnvironmentMaps::new(
            &device,
            &command_pool,
            &shaders,
            &pipeline_layouts,
            &binding_layouts,
            &mut pools,
            clamp_sampler.handle(),
            sky,
            config.environment_resolution,
        )?;

        let scene_buffers = PerFrame::try_new(|_| {
            Buffer::new(device.clone(), BufferUsage::Uniform, SceneBlock::SIZE as vk::DeviceSize)
        })?;
        let light_buffers = PerFrame::try_new(|_| {
            Buffer::new(device.clone(), BufferUsage::Uniform, LightBlock::SIZE as vk::DeviceSize)
        })?;
        let scene_sets = pools
            .scene
            .allocate_n(binding_layouts.get(BindingShape::SceneUniform), FRAMES_IN_FLIGHT)?;
        for (slot, set) in scene_sets.iter().enumerate() {
            let shadow_view = directional.sampled_view(slot).ok_or_else(|| {
                RhiError::ImageError(format!("directional shadow has no depth view for slot {}", slot))
            })?;
            DescriptorWriter::new()
                .uniform_buffer(0, scene_buffers[slot].handle())
                .uniform_buffer(1, light_buffers[slot].handle())
                .image(
                    2,
                    shadow_sampler.handle(),
                    shadow_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                )
                .write(&device, *set);
        }
        let scene_sets = PerFrame::from_fn(|slot| scene_sets[slot]);

        // The volume mesh never binds a material.
        let light_volume = GpuMesh::upload(
            &device,
            &command_pool,
            &primitives::uv_sphere(1.0, LIGHT_VOLUME_SECTORS, LIGHT_VOLUME_STACKS)?,
            MaterialHandle::new(0),
        )?;

        let surface_sets = SurfaceSets::new(&binding_layouts, &mut pools.sampling)?;
        let surface = SurfaceTargets::new(
            &device,
            &command_pool,
            &shaders,
            &pipeline_layouts,
            context.surface_format(),
            context.extent(),
            context.swapchain().image_views(),
        )?;
        surface_sets.repoint(&device, &surface, clamp_sampler.handle())?;

        info!(
            "Deferred renderer ready: {} light slot(s), validation {}",
            MAX_LIGHTS,
            if context.has_validation() { "on" } else { "off" }
        );

        Ok(Self {
            surface: Some(surface),
            surface_sets,
            frame_sync,
            scene_buffers,
            light_buffers,
            scene_sets,
            directional,
            point_shadows,
            environment,
            light_volume,
            meshes: MeshRegistry::default(),
            materials: MaterialRegistry::default(),
            material_sampler,
            clamp_sampler,
            _shadow_sampler: shadow_sampler,
            pools,
            binding_layouts,
            pipeline_layouts,
            shaders,
            config,
            context,
        })
    }

    /// Uploads a mesh drawn with `material`.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownMaterial`] if `material` was never created.
    pub fn upload_mesh(&mut self, data: &MeshData, material: MaterialHandle) -> RenderResult<MeshHandle> {
        if !self.materials.contains(material) {
            return Err(RenderError::UnknownMaterial(material));
        }
        let mesh = GpuMesh::upload(self.device(), self.context.command_pool(), data, material)?;
        let handle = self.meshes.insert(mesh);
        debug!("Uploaded mesh {:?} ({} indices)", handle, data.index_count());
        Ok(handle)
    }

    /// Uploads a material's textures and binds them into a new set.
    ///
    /// # Errors
    ///
    /// [`RenderError::CapacityExceeded`] once every material set is in use.
    pub fn create_material(&mut self, textures: &MaterialTextures) -> RenderResult<MaterialHandle> {
        self.materials.create(
            self.context.device(),
            self.context.command_pool(),
            &mut self.pools.materials,
            self.binding_layouts.get(BindingShape::Material),
            self.material_sampler.handle(),
            textures,
        )
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.context.device()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.context.extent()
    }

    pub fn environment(&self) -> &EnvironmentMaps {
        &self.environment
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn targets(&self) -> RenderResult<&SurfaceTargets> {
        self.surface
            .as_ref()
            .ok_or_else(|| RenderError::Surface("surface targets not built".into()))
    }

    fn stage(&self, pass: PassId) -> RenderResult<&RenderStage> {
        Ok(match pass {
            PassId::PointShadow(index) => {
                check_light_index(index)?;
                self.point_shadows.caster(index).stage()
            }
            PassId::DirectionalDepth => self.directional.stage(),
            PassId::Geometry => self.targets()?.stage(SurfaceStage::Geometry),
            PassId::Composition => self.targets()?.stage(SurfaceStage::Composition),
            PassId::BloomHorizontal => self.targets()?.stage(SurfaceStage::BloomHorizontal),
            PassId::BloomVertical => self.targets()?.stage(SurfaceStage::BloomVertical),
            PassId::PostProcess => self.targets()?.stage(SurfaceStage::Post),
        })
    }

    fn stage_mut(&mut self, pass: PassId) -> RenderResult<&mut RenderStage> {
        let surface = surface_mut(&mut self.surface)?;
        Ok(match pass {
            PassId::PointShadow(index) => {
                check_light_index(index)?;
                self.point_shadows.caster_mut(index).stage_mut()
            }
            PassId::DirectionalDepth => self.directional.stage_mut(),
            PassId::Geometry => surface.stage_mut(SurfaceStage::Geometry),
            PassId::Composition => surface.stage_mut(SurfaceStage::Composition),
            PassId::BloomHorizontal => surface.stage_mut(SurfaceStage::BloomHorizontal),
            PassId::BloomVertical => surface.stage_mut(SurfaceStage::BloomVertical),
            PassId::PostProcess => surface.stage_mut(SurfaceStage::Post),
        })
    }

    fn semaphore(&self, slot: usize, semaphore: SemaphoreRef) -> RenderResult<vk::Semaphore> {
        match semaphore {
            SemaphoreRef::ImageAcquired => Ok(self.frame_sync.image_acquired(slot)),
            SemaphoreRef::PassComplete(pass) => Ok(self.stage(pass)?.signal(slot)),
        }
    }
}

fn surface_mut(surface: &mut Option<SurfaceTargets>) -> RenderResult<&mut SurfaceTargets> {
    surface
        .as_mut()
        .ok_or_else(|| RenderError::Surface("surface targets not built".into()))
}

fn check_light_index(index: usize) -> RenderResult<()> {
    if index >= MAX_LIGHTS {
        return Err(RenderError::CapacityExceeded {
            resource: "point lights",
            max: MAX_LIGHTS as u32,
        });
    }
    Ok(())
}

impl FrameBackend for DeferredBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.frame_sync.wait(slot)?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        self.context.acquire(self.frame_sync.image_acquired(slot))
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.frame_sync.reset(slot)?;
        let surface = surface_mut(&mut self.surface)?;
        for stage in SurfaceStage::ALL {
            surface.stage_mut(stage).reset(slot)?;
        }
        self.directional.stage_mut().reset(slot)?;
        for index in 0..MAX_LIGHTS {
            self.point_shadows.caster_mut(index).stage_mut().reset(slot)?;
        }
        Ok(())
    }

    fn write_frame_uniforms(
        &mut self,
        slot: usize,
        scene: &SceneUniforms,
        lights: &LightList,
    ) -> RenderResult<()> {
        self.scene_buffers[slot].write(&SceneBlock::new(scene, &self.config, lights.len()))?;
        self.light_buffers[slot].write(&LightBlock::new(lights))?;
        self.point_shadows.update(slot, lights.as_slice())
    }

    fn record_pass(&mut self, frame: &FrameContext<'_>, pass: PassId) -> RenderResult<()> {
        let slot = frame.slot;
        let layouts = &self.pipeline_layouts;
        trace!("Recording {} for slot {}", pass.name(), slot);
        match pass {
            PassId::PointShadow(index) => {
                check_light_index(index)?;
                let light = frame
                    .lights
                    .as_slice()
                    .get(index)
                    .ok_or(RenderError::CapacityExceeded {
                        resource: "active point lights",
                        max: frame.lights.len() as u32,
                    })?;
                self.point_shadows
                    .record(index, slot, light, layouts, frame.draws, &self.meshes)
            }
            PassId::DirectionalDepth => {
                self.directional
                    .record(slot, frame.scene, layouts, frame.draws, &self.meshes)
            }
            PassId::Geometry => surface_mut(&mut self.surface)?.record_geometry(
                slot,
                self.scene_sets[slot],
                layouts,
                frame.draws,
                &self.meshes,
                &self.materials,
            ),
            PassId::Composition => {
                let point_shadows = &self.point_shadows;
                surface_mut(&mut self.surface)?.record_composition(
                    slot,
                    self.scene_sets[slot],
                    self.surface_sets.gbuffer[slot],
                    self.environment.set(),
                    layouts,
                    frame.lights.as_slice(),
                    |index| point_shadows.caster(index).sampling_set(slot),
                    &self.light_volume,
                )
            }
            PassId::BloomHorizontal => surface_mut(&mut self.surface)?.record_bloom(
                slot,
                true,
                self.surface_sets.bright[slot],
                layouts,
            ),
            PassId::BloomVertical => surface_mut(&mut self.surface)?.record_bloom(
                slot,
                false,
                self.surface_sets.blurred_horizontal[slot],
                layouts,
            ),
            PassId::PostProcess => surface_mut(&mut self.surface)?.record_post(
                slot,
                frame.image_index,
                self.surface_sets.lit[slot],
                self.surface_sets.bloom[slot],
                layouts,
                self.config.exposure,
            ),
        }
    }

    fn submit_batch(&mut self, slot: usize, batch: &SubmissionBatch) -> RenderResult<()> {
        let mut submissions: Vec<StageSubmission> = Vec::with_capacity(batch.submissions.len());
        for planned in &batch.submissions {
            let waits = planned
                .waits
                .iter()
                .map(|(semaphore, stage)| Ok((self.semaphore(slot, *semaphore)?, *stage)))
                .collect::<RenderResult<Vec<_>>>()?;
            submissions.push(self.stage_mut(planned.pass)?.submit_info(slot, &waits)?);
        }

        let fence = if batch.signals_fence() {
            self.frame_sync.fence(slot)
        } else {
            vk::Fence::null()
        };
        let infos: Vec<vk::SubmitInfo> = submissions.iter().map(StageSubmission::info).collect();
        unsafe { self.context.device().submit_graphics(&infos, fence)? };
        trace!("Submitted {} pass(es) for slot {}", infos.len(), slot);
        Ok(())
    }

    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
        wait: SemaphoreRef,
    ) -> RenderResult<PresentOutcome> {
        let wait = self.semaphore(slot, wait)?;
        self.context.present(wait, image_index)
    }

    fn rebuild_surface(&mut self, extent: Option<(u32, u32)>) -> RenderResult<SurfaceRebuild> {
        self.context.device().wait_idle()?;
        let requested = extent
            .map(|(width, height)| vk::Extent2D { width, height })
            .unwrap_or_else(|| self.context.extent());
        let Some(extent) = self.context.drawable_extent(requested)? else {
            debug!("Surface is zero-sized; keeping the current targets");
            return Ok(SurfaceRebuild::ZeroSized);
        };

        // The post stage borrows swapchain views, so it goes first.
        self.surface = None;
        self.context.recreate_swapchain(extent)?;

        let targets = SurfaceTargets::new(
            self.context.device(),
            self.context.command_pool(),
            &self.shaders,
            &self.pipeline_layouts,
            self.context.surface_format(),
            self.context.extent(),
            self.context.swapchain().image_views(),
        )?;
        verify_signature(&targets.signature(), self.context.surface_format())?;
        self.surface_sets
            .repoint(self.context.device(), &targets, self.clamp_sampler.handle())?;
        self.surface = Some(targets);
        Ok(SurfaceRebuild::Rebuilt)
    }

    fn contains_mesh(&self, mesh: MeshHandle) -> bool {
        self.meshes.contains(mesh)
    }
}

impl Drop for DeferredBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.device().wait_idle() {
            error!("Failed to wait for device idle before teardown: {}", e);
        }
    }
}

/// The deferred renderer: frame sequencing over the Vulkan backend.
pub type Renderer = FrameOrchestrator<DeferredBackend>;

impl FrameOrchestrator<DeferredBackend> {
    /// Creates a renderer for a window.
    ///
    /// # Errors
    ///
    /// Any device, shader or resource creation failure.
    pub fn create(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        config: RendererConfig,
        sky: &CubeFaces,
    ) -> RenderResult<Self> {
        Ok(Self::new(DeferredBackend::new(display, window, config, sky)?))
    }

    pub fn upload_mesh(&mut self, data: &MeshData, material: MaterialHandle) -> RenderResult<MeshHandle> {
        self.backend_mut().upload_mesh(data, material)
    }

    pub fn create_material(&mut self, textures: &MaterialTextures) -> RenderResult<MaterialHandle> {
        self.backend_mut().create_material(textures)
    }
}
