//! Uploaded meshes and materials, addressed by handle.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use penumbra_resources::{MaterialTextures, MeshData};
use penumbra_rhi::buffer::{Buffer, BufferUsage};
use penumbra_rhi::command::{CommandBuffer, CommandPool};
use penumbra_rhi::descriptor::DescriptorWriter;
use penumbra_rhi::device::Device;
use penumbra_rhi::{RhiError, RhiResult};
use penumbra_scene::{MaterialHandle, MeshHandle};

use crate::bindings::BoundedPool;
use crate::error::RenderResult;
use crate::texture::Texture;

/// Device-local vertex and index buffers of one mesh.
pub struct GpuMesh {
    vertex: Buffer,
    index: Buffer,
    index_count: u32,
    material: MaterialHandle,
}

impl GpuMesh {
    pub fn upload(
        device: &Arc<Device>,
        pool: &CommandPool,
        data: &MeshData,
        material: MaterialHandle,
    ) -> RhiResult<Self> {
        let vertex =
            Buffer::device_local_with_data(device.clone(), pool, BufferUsage::Vertex, data.vertex_bytes())?;
        let index =
            Buffer::device_local_with_data(device.clone(), pool, BufferUsage::Index, data.index_bytes())?;
        Ok(Self {
            vertex,
            index,
            index_count: data.index_count(),
            material,
        })
    }

    /// Binds both buffers and issues one indexed draw.
    pub fn draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffer(self.vertex.handle());
        cmd.bind_index_buffer(self.index.handle());
        cmd.draw_indexed(self.index_count);
    }

    #[inline]
    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Meshes in upload order; a handle is the upload index.
#[derive(Default)]
pub struct MeshRegistry {
    meshes: Vec<GpuMesh>,
}

impl MeshRegistry {
    pub fn insert(&mut self, mesh: GpuMesh) -> MeshHandle {
        self.meshes.push(mesh);
        MeshHandle::new(self.meshes.len() as u32 - 1)
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle.index())
    }

    pub fn contains(&self, handle: MeshHandle) -> bool {
        handle.index() < self.meshes.len()
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

struct GpuMaterial {
    set: vk::DescriptorSet,
    // Kept alive for the set's image views.
    _textures: [Texture; 3],
}

/// Material descriptor sets and the textures they reference.
#[derive(Default)]
pub struct MaterialRegistry {
    materials: Vec<GpuMaterial>,
}

impl MaterialRegistry {
    /// Uploads three textures and binds them into a new material set.
    ///
    /// The set is allocated first, so a full pool fails before any upload.
    pub fn create(
        &mut self,
        device: &Arc<Device>,
        command_pool: &CommandPool,
        descriptor_pool: &mut BoundedPool,
        layout: vk::DescriptorSetLayout,
        sampler: vk::Sampler,
        textures: &MaterialTextures,
    ) -> RenderResult<MaterialHandle> {
        let set = descriptor_pool
            .allocate(&[layout])?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("descriptor pool returned no set".into()))?;

        let uploaded = (|| -> RhiResult<[Texture; 3]> {
            Ok([
                Texture::upload(device, command_pool, &textures.albedo, "material_albedo")?,
                Texture::upload(device, command_pool, &textures.normal, "material_normal")?,
                Texture::upload(
                    device,
                    command_pool,
                    &textures.metallic_roughness,
                    "material_metallic_roughness",
                )?,
            ])
        })();
        let uploaded = match uploaded {
            Ok(t) => t,
            Err(e) => {
                descriptor_pool.free(&[set])?;
                return Err(e.into());
            }
        };

        uploaded
            .iter()
            .enumerate()
            .fold(DescriptorWriter::new(), |writer, (binding, texture)| {
                writer.image(
                    binding as u32,
                    sampler,
                    texture.view(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
            .write(device, set);

        self.materials.push(GpuMaterial {
            set,
            _textures: uploaded,
        });
        let handle = MaterialHandle::new(self.materials.len() as u32 - 1);
        debug!("Created material {:?}", handle);
        Ok(handle)
    }

    pub fn set(&self, handle: MaterialHandle) -> Option<vk::DescriptorSet> {
        self.materials.get(handle.index()).map(|m| m.set)
    }

    pub fn contains(&self, handle: MaterialHandle) -> bool {
        handle.index() < self.materials.len()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
