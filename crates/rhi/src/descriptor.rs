//! Descriptor set layouts, pools and writes.
//!
//! - [`DescriptorSetLayout`] fixes the bindings a shader set expects
//! - [`DescriptorPool`] hands out sets of those layouts
//! - [`DescriptorWriter`] batches buffer and image writes into one update
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use penumbra_rhi::device::Device;
//! use penumbra_rhi::descriptor::{
//!     DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
//! };
//!
//! # fn example(device: Arc<Device>, view: vk::ImageView, sampler: vk::Sampler) -> Result<(), penumbra_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[DescriptorBindingBuilder::combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)],
//! )?;
//! let pool = DescriptorPool::new(
//!     device.clone(),
//!     1,
//!     &[vk::DescriptorPoolSize::default()
//!         .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
//!         .descriptor_count(1)],
//! )?;
//! let set = pool.allocate(&[layout.handle()])?[0];
//! DescriptorWriter::new()
//!     .image(0, sampler, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
//!     .write(&device, set);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<(vk::DescriptorType, u32)>,
}

impl DescriptorSetLayout {
    /// Creates a layout from its bindings.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings: bindings
                .iter()
                .map(|b| (b.descriptor_type, b.descriptor_count))
                .collect(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Pool sizes needed to allocate `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes_for(&self.bindings, sets)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Sums descriptor counts per type for `sets` copies of a layout.
pub fn pool_sizes_for(
    bindings: &[(vk::DescriptorType, u32)],
    sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for &(ty, count) in bindings {
        match sizes.iter_mut().find(|s| s.ty == ty) {
            Some(size) => size.descriptor_count += count * sets,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(count * sets),
            ),
        }
    }
    sizes
}

/// Descriptor pool.
///
/// Not thread-safe; the renderer touches pools from one thread only.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool that can free individual sets.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per layout handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted or fragmented.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Returns sets to the pool. They must not be in use by the device.
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        unsafe {
            self.device.handle().free_descriptor_sets(self.pool, sets)?;
        }
        debug!("Freed {} descriptor set(s)", sets.len());
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

enum PendingWrite {
    Buffer(u32, vk::DescriptorBufferInfo),
    Image(u32, vk::DescriptorImageInfo),
}

/// Collects writes for one descriptor set and applies them in a single
/// `vkUpdateDescriptorSets` call.
///
/// The set must not be in use by a pending submission when written.
#[derive(Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a whole uniform buffer at `binding`.
    pub fn uniform_buffer(mut self, binding: u32, buffer: vk::Buffer) -> Self {
        self.writes.push(PendingWrite::Buffer(
            binding,
            vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE),
        ));
        self
    }

    /// Binds a combined image sampler at `binding`.
    pub fn image(
        mut self,
        binding: u32,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        self.writes.push(PendingWrite::Image(
            binding,
            vk::DescriptorImageInfo::default()
                .sampler(sampler)
                .image_view(view)
                .image_layout(layout),
        ));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies every collected write to `set`.
    pub fn write(self, device: &Device, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }

        // The info structs must outlive the write array that points at them.
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = self
            .writes
            .iter()
            .filter_map(|w| match w {
                PendingWrite::Buffer(_, info) => Some([*info]),
                PendingWrite::Image(..) => None,
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = self
            .writes
            .iter()
            .filter_map(|w| match w {
                PendingWrite::Image(_, info) => Some([*info]),
                PendingWrite::Buffer(..) => None,
            })
            .collect();

        let mut buffers = buffer_infos.iter();
        let mut images = image_infos.iter();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .filter_map(|w| match w {
                PendingWrite::Buffer(binding, _) => buffers.next().map(|info| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(info)
                }),
                PendingWrite::Image(binding, _) => images.next().map(|info| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(*binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info)
                }),
            })
            .collect();

        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }
    }
}

/// Shorthand constructors for layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_descriptor_binding_builder_combined_image_sampler() {
        let binding =
            DescriptorBindingBuilder::combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(binding.binding, 2);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_pool_sizes_merge_types() {
        let bindings = [
            (vk::DescriptorType::UNIFORM_BUFFER, 1),
            (vk::DescriptorType::UNIFORM_BUFFER, 1),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
        ];
        let sizes = pool_sizes_for(&bindings, 2);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].descriptor_count, 2);
    }

    #[test]
    fn test_writer_collects_writes() {
        let writer = DescriptorWriter::new()
            .uniform_buffer(0, vk::Buffer::null())
            .image(
                1,
                vk::Sampler::null(),
                vk::ImageView::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        assert_eq!(writer.len(), 2);
        assert!(DescriptorWriter::new().is_empty());
    }
}
