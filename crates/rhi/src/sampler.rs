//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Sampler configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering.
    pub max_anisotropy: Option<f32>,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::linear_repeat(None)
    }
}

impl SamplerDesc {
    /// Material textures: linear filtering, wrapping, optional anisotropy.
    pub fn linear_repeat(max_anisotropy: Option<f32>) -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }

    /// Render-target sampling: linear filtering clamped to the edge.
    pub fn linear_clamp() -> Self {
        Self {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_anisotropy: None,
            ..Self::linear_repeat(None)
        }
    }

    /// Shadow maps: clamped to an opaque white border so lookups outside
    /// the map read as fully lit.
    pub fn shadow_clamp() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            max_anisotropy: None,
            max_lod: 1.0,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        }
    }
}

/// Owned `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    /// Creates a sampler. The requested anisotropy is clamped to the device limit.
    pub fn new(device: Arc<Device>, desc: SamplerDesc) -> RhiResult<Self> {
        let limit = device.limits().max_sampler_anisotropy;
        let anisotropy = desc.max_anisotropy.map(|a| a.clamp(1.0, limit));

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color)
            .unnormalized_coordinates(false);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!(
            "Created sampler: {:?} {:?}, anisotropy {:?}",
            desc.filter, desc.address_mode, anisotropy
        );

        Ok(Self {
            device,
            sampler,
            desc,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    #[inline]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(
            SamplerDesc::linear_clamp().address_mode,
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert_eq!(
            SamplerDesc::shadow_clamp().border_color,
            vk::BorderColor::FLOAT_OPAQUE_WHITE
        );
        assert_eq!(SamplerDesc::linear_repeat(Some(16.0)).max_anisotropy, Some(16.0));
        assert_eq!(SamplerDesc::default().max_anisotropy, None);
    }
}
