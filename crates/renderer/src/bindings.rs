//! Descriptor binding layer.
//!
//! Every descriptor set the renderer uses has one of a closed set of
//! [`BindingShape`]s. Sets come from [`BoundedPool`]s whose capacity is
//! checked on the host before Vulkan is asked for anything, so running out
//! of materials is a [`RenderError::CapacityExceeded`] rather than a driver
//! error.

use std::ops::Index;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use penumbra_core::config::{FRAMES_IN_FLIGHT, MAX_LIGHTS, MAX_MATERIALS};
use penumbra_rhi::descriptor::{
    pool_sizes_for, DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout,
    DescriptorWriter,
};
use penumbra_rhi::device::Device;
use penumbra_rhi::RhiResult;

use crate::error::{RenderError, RenderResult};

/// Layout of one descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingShape {
    /// Scene block, light block and the directional shadow map.
    SceneUniform,
    /// Albedo, normal and metallic-roughness textures.
    Material,
    /// The four G-buffer color attachments.
    GeometrySampling,
    SingleTexture,
    /// Irradiance cube, pre-filtered cube and BRDF LUT.
    Environment,
    /// Six cube-face matrices of one point light.
    ShadowFaces,
}

impl BindingShape {
    pub const ALL: [BindingShape; 6] = [
        BindingShape::SceneUniform,
        BindingShape::Material,
        BindingShape::GeometrySampling,
        BindingShape::SingleTexture,
        BindingShape::Environment,
        BindingShape::ShadowFaces,
    ];

    fn index(self) -> usize {
        match self {
            BindingShape::SceneUniform => 0,
            BindingShape::Material => 1,
            BindingShape::GeometrySampling => 2,
            BindingShape::SingleTexture => 3,
            BindingShape::Environment => 4,
            BindingShape::ShadowFaces => 5,
        }
    }

    /// `(binding, type, stages)` in binding order.
    pub fn bindings(self) -> Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)> {
        let ubo = vk::DescriptorType::UNIFORM_BUFFER;
        let sampler = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let samplers = |n: u32| (0..n).map(|b| (b, sampler, fragment)).collect();

        match self {
            BindingShape::SceneUniform => vec![
                (0, ubo, vk::ShaderStageFlags::VERTEX | fragment),
                (1, ubo, fragment),
                (2, sampler, fragment),
            ],
            BindingShape::Material => samplers(3),
            BindingShape::GeometrySampling => samplers(4),
            BindingShape::SingleTexture => samplers(1),
            BindingShape::Environment => samplers(3),
            BindingShape::ShadowFaces => vec![(0, ubo, vk::ShaderStageFlags::GEOMETRY)],
        }
    }

    pub fn layout_bindings(self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings()
            .into_iter()
            .map(|(binding, ty, stages)| match ty {
                vk::DescriptorType::UNIFORM_BUFFER => {
                    DescriptorBindingBuilder::uniform_buffer(binding, stages)
                }
                _ => DescriptorBindingBuilder::combined_image_sampler(binding, stages),
            })
            .collect()
    }

    /// Descriptor counts per type for one set.
    pub fn descriptor_counts(self) -> Vec<(vk::DescriptorType, u32)> {
        self.bindings()
            .into_iter()
            .map(|(_, ty, _)| (ty, 1))
            .collect()
    }
}

/// One descriptor set layout per [`BindingShape`].
pub struct BindingLayouts {
    layouts: Vec<DescriptorSetLayout>,
}

impl BindingLayouts {
    pub fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let layouts = BindingShape::ALL
            .iter()
            .map(|shape| DescriptorSetLayout::new(device.clone(), &shape.layout_bindings()))
            .collect::<RhiResult<Vec<_>>>()?;
        Ok(Self { layouts })
    }

    #[inline]
    pub fn get(&self, shape: BindingShape) -> vk::DescriptorSetLayout {
        self.layouts[shape.index()].handle()
    }
}

/// Host-side count of live allocations against a fixed maximum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapacityCounter {
    resource: &'static str,
    used: u32,
    max: u32,
}

impl CapacityCounter {
    pub fn new(resource: &'static str, max: u32) -> Self {
        Self {
            resource,
            used: 0,
            max,
        }
    }

    /// Claims `count` entries, or fails without claiming any.
    pub fn reserve(&mut self, count: u32) -> RenderResult<()> {
        match self.used.checked_add(count) {
            Some(total) if total <= self.max => {
                self.used = total;
                Ok(())
            }
            _ => Err(RenderError::CapacityExceeded {
                resource: self.resource,
                max: self.max,
            }),
        }
    }

    pub fn release(&mut self, count: u32) {
        self.used = self.used.saturating_sub(count);
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }

    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }
}

/// Reserves `count` slots, then runs `allocate`. Past capacity `allocate`
/// never runs; if it fails the reservation is returned.
fn reserve_then<T>(
    counter: &mut CapacityCounter,
    count: u32,
    allocate: impl FnOnce() -> RhiResult<T>,
) -> RenderResult<T> {
    counter.reserve(count)?;
    allocate().map_err(|e| {
        counter.release(count);
        e.into()
    })
}

/// A descriptor pool that refuses allocations past its capacity.
pub struct BoundedPool {
    pool: DescriptorPool,
    counter: CapacityCounter,
}

impl BoundedPool {
    /// Creates a pool for `max_sets` sets, sized for the given shapes.
    ///
    /// `shapes` lists each shape with how many of its sets the pool must hold.
    pub fn new(
        device: &Arc<Device>,
        resource: &'static str,
        shapes: &[(BindingShape, u32)],
    ) -> RhiResult<Self> {
        let counts: Vec<(vk::DescriptorType, u32)> = shapes
            .iter()
            .flat_map(|(shape, sets)| {
                shape
                    .descriptor_counts()
                    .into_iter()
                    .map(move |(ty, count)| (ty, count * sets))
            })
            .collect();
        let max_sets = shapes.iter().map(|(_, sets)| sets).sum();
        let pool = DescriptorPool::new(device.clone(), max_sets, &pool_sizes_for(&counts, 1))?;
        debug!("Descriptor pool '{}' holds {} set(s)", resource, max_sets);
        Ok(Self {
            pool,
            counter: CapacityCounter::new(resource, max_sets),
        })
    }

    /// Allocates one set per layout.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CapacityExceeded`] before calling Vulkan if the
    /// pool cannot hold them.
    pub fn allocate(&mut self, layouts: &[vk::DescriptorSetLayout]) -> RenderResult<Vec<vk::DescriptorSet>> {
        let pool = &self.pool;
        reserve_then(&mut self.counter, layouts.len() as u32, || pool.allocate(layouts))
    }

    /// Allocates `count` sets of one layout.
    pub fn allocate_n(
        &mut self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        self.allocate(&vec![layout; count])
    }

    pub fn free(&mut self, sets: &[vk::DescriptorSet]) -> RenderResult<()> {
        self.pool.free(sets)?;
        self.counter.release(sets.len() as u32);
        Ok(())
    }

    #[inline]
    pub fn counter(&self) -> &CapacityCounter {
        &self.counter
    }
}

/// Every descriptor pool of the renderer.
pub struct DescriptorPools {
    pub scene: BoundedPool,
    pub materials: BoundedPool,
    pub sampling: BoundedPool,
    pub shadow_faces: BoundedPool,
    pub environment: BoundedPool,
}

/// Single-texture sets per frame slot read by surface passes: bloom H input,
/// bloom V input, and the two post inputs.
const SURFACE_TEXTURE_SETS_PER_SLOT: u32 = 4;
/// Single-texture sets used once at startup by environment filtering.
const STARTUP_TEXTURE_SETS: u32 = 1;

impl DescriptorPools {
    pub fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let slots = FRAMES_IN_FLIGHT as u32;
        let shadows = MAX_LIGHTS as u32 * slots;
        Ok(Self {
            scene: BoundedPool::new(device, "scene sets", &[(BindingShape::SceneUniform, slots)])?,
            materials: BoundedPool::new(
                device,
                "materials",
                &[(BindingShape::Material, MAX_MATERIALS)],
            )?,
            sampling: BoundedPool::new(
                device,
                "sampling sets",
                &[
                    (BindingShape::GeometrySampling, slots),
                    (
                        BindingShape::SingleTexture,
                        SURFACE_TEXTURE_SETS_PER_SLOT * slots + shadows + STARTUP_TEXTURE_SETS,
                    ),
                ],
            )?,
            shadow_faces: BoundedPool::new(
                device,
                "shadow face sets",
                &[(BindingShape::ShadowFaces, shadows)],
            )?,
            environment: BoundedPool::new(device, "environment sets", &[(BindingShape::Environment, 1)])?,
        })
    }
}

/// One value per frame slot.
#[derive(Debug)]
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    pub fn try_new<E, F>(mut make: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        let items = (0..FRAMES_IN_FLIGHT)
            .map(&mut make)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self { items })
    }

    pub fn from_fn(make: impl FnMut(usize) -> T) -> Self {
        Self {
            items: (0..FRAMES_IN_FLIGHT).map(make).collect(),
        }
    }

    /// Splits a vector with exactly one item per slot.
    pub fn from_vec(items: Vec<T>) -> Option<Self> {
        (items.len() == FRAMES_IN_FLIGHT).then_some(Self { items })
    }

    #[inline]
    pub fn get(&self, slot: usize) -> &T {
        &self.items[slot % FRAMES_IN_FLIGHT]
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> &mut T {
        &mut self.items[slot % FRAMES_IN_FLIGHT]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Index<usize> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: usize) -> &T {
        self.get(slot)
    }
}

/// Rewrites the image bindings `0..views.len()` of an existing set.
///
/// The set must not be in use by a pending submission.
pub fn repoint_image_set(
    device: &Device,
    set: vk::DescriptorSet,
    sampler: vk::Sampler,
    views: &[(vk::ImageView, vk::ImageLayout)],
) {
    views
        .iter()
        .enumerate()
        .fold(DescriptorWriter::new(), |writer, (binding, (view, layout))| {
            writer.image(binding as u32, sampler, *view, *layout)
        })
        .write(device, set);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_capacity_is_enforced() {
        let mut counter = CapacityCounter::new("materials", MAX_MATERIALS);
        for _ in 0..MAX_MATERIALS {
            counter.reserve(1).unwrap();
        }
        assert_eq!(counter.remaining(), 0);

        let err = counter.reserve(1).unwrap_err();
        assert!(matches!(
            err,
            RenderError::CapacityExceeded {
                resource: "materials",
                max: 128
            }
        ));
        assert_eq!(counter.used(), MAX_MATERIALS);
    }

    #[test]
    fn test_allocation_past_capacity_never_reaches_vulkan() {
        let mut counter = CapacityCounter::new("materials", MAX_MATERIALS);
        let mut calls = 0;
        for _ in 0..MAX_MATERIALS {
            reserve_then(&mut counter, 1, || {
                calls += 1;
                Ok(())
            })
            .unwrap();
        }
        let result = reserve_then(&mut counter, 1, || {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(RenderError::CapacityExceeded { max: 128, .. })));
        assert_eq!(calls, MAX_MATERIALS);
    }

    #[test]
    fn test_failed_allocation_returns_reservation() {
        let mut counter = CapacityCounter::new("sets", 4);
        let result: RenderResult<()> = reserve_then(&mut counter, 3, || {
            Err(penumbra_rhi::RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        });
        assert!(matches!(result, Err(RenderError::Rhi(_))));
        assert_eq!(counter.used(), 0);
    }

    #[test]
    fn test_failed_reserve_claims_nothing() {
        let mut counter = CapacityCounter::new("sets", 4);
        counter.reserve(3).unwrap();
        assert!(counter.reserve(2).is_err());
        assert_eq!(counter.used(), 3);
        counter.release(3);
        counter.reserve(4).unwrap();
        assert!(counter.reserve(u32::MAX).is_err());
    }

    #[test]
    fn test_shape_binding_counts() {
        assert_eq!(BindingShape::SceneUniform.bindings().len(), 3);
        assert_eq!(BindingShape::Material.bindings().len(), 3);
        assert_eq!(BindingShape::GeometrySampling.bindings().len(), 4);
        assert_eq!(BindingShape::SingleTexture.bindings().len(), 1);
        assert_eq!(BindingShape::Environment.bindings().len(), 3);
        assert_eq!(BindingShape::ShadowFaces.bindings().len(), 1);
    }

    #[test]
    fn test_shadow_faces_visible_to_geometry_stage() {
        let (_, ty, stages) = BindingShape::ShadowFaces.bindings()[0];
        assert_eq!(ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(stages.contains(vk::ShaderStageFlags::GEOMETRY));
    }

    #[test]
    fn test_bindings_are_dense() {
        for shape in BindingShape::ALL {
            for (i, (binding, _, _)) in shape.bindings().into_iter().enumerate() {
                assert_eq!(binding, i as u32, "{:?}", shape);
            }
            assert_eq!(shape.layout_bindings().len(), shape.bindings().len());
        }
    }

    #[test]
    fn test_shape_indices_are_unique() {
        let mut seen = [false; BindingShape::ALL.len()];
        for shape in BindingShape::ALL {
            assert!(!seen[shape.index()]);
            seen[shape.index()] = true;
        }
    }

    #[test]
    fn test_per_frame_wraps_slots() {
        let frames: PerFrame<usize> = PerFrame::try_new(|slot| Ok::<_, ()>(slot * 10)).unwrap();
        assert_eq!(frames[0], 0);
        assert_eq!(frames[1], 10);
        assert_eq!(*frames.get(FRAMES_IN_FLIGHT), 0);
        assert_eq!(frames.iter().count(), FRAMES_IN_FLIGHT);
        assert!(PerFrame::from_vec(vec![1]).is_none());
    }
}
