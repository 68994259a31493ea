//! Material texture sets.

use crate::texture::{ColorEncoding, TextureData};

/// The three textures bound by one material descriptor set.
#[derive(Debug, Clone)]
pub struct MaterialTextures {
    /// Base color, sRGB
    pub albedo: TextureData,
    /// Tangent-space normal map, linear
    pub normal: TextureData,
    /// Metallic in blue, roughness in green, linear
    pub metallic_roughness: TextureData,
}

impl MaterialTextures {
    pub fn new(albedo: TextureData, normal: TextureData, metallic_roughness: TextureData) -> Self {
        Self {
            albedo,
            normal,
            metallic_roughness,
        }
    }

    /// Untextured material from constant factors.
    pub fn flat(albedo: [u8; 4], metallic: f32, roughness: f32) -> Self {
        let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self {
            albedo: TextureData::solid(albedo, ColorEncoding::Srgb),
            normal: TextureData::flat_normal(),
            metallic_roughness: TextureData::solid(
                [0, to_byte(roughness), to_byte(metallic), 255],
                ColorEncoding::Linear,
            ),
        }
    }

    /// Replaces the albedo, keeping the other maps.
    pub fn with_albedo(mut self, albedo: TextureData) -> Self {
        self.albedo = albedo;
        self
    }
}

impl Default for MaterialTextures {
    fn default() -> Self {
        Self::flat([255, 255, 255, 255], 0.0, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_material_packs_factors() {
        let material = MaterialTextures::flat([200, 10, 10, 255], 1.0, 0.5);
        assert_eq!(material.metallic_roughness.pixels(), &[0, 128, 255, 255]);
        assert_eq!(material.albedo.encoding(), ColorEncoding::Srgb);
        assert_eq!(material.normal.encoding(), ColorEncoding::Linear);
    }
}
