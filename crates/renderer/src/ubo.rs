//! Uniform buffer and push constant layouts.
//!
//! These structures must match the GLSL std140 blocks and push constant
//! ranges exactly. All structures use `#[repr(C)]` with explicit padding and
//! implement `Pod` and `Zeroable` for safe byte casting. Vectors are stored as
//! `Vec4` so no field depends on `Vec3` packing rules.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use penumbra_core::config::MAX_LIGHTS;
use penumbra_core::RendererConfig;
use penumbra_scene::{LightList, PointLight, SceneUniforms};

/// Scene block, set 0 binding 0.
///
/// # Memory Layout
///
/// - Offset 0: view (64 bytes)
/// - Offset 64: projection (64 bytes)
/// - Offset 128: light_space (64 bytes)
/// - Offset 192: camera position, w unused (16 bytes)
/// - Offset 208: ambient, w unused (16 bytes)
/// - Offset 224: directional direction, w unused (16 bytes)
/// - Offset 240: directional color, w unused (16 bytes)
/// - Offset 256: bloom threshold, exposure, light count, unused (16 bytes)
/// - Total size: 272 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SceneBlock {
    pub view: Mat4,
    pub projection: Mat4,
    pub light_space: Mat4,
    pub camera_position: Vec4,
    pub ambient: Vec4,
    pub directional_direction: Vec4,
    pub directional_color: Vec4,
    pub params: Vec4,
}

impl SceneBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(scene: &SceneUniforms, config: &RendererConfig, light_count: usize) -> Self {
        let direction = scene
            .directional
            .direction
            .try_normalize()
            .unwrap_or(Vec3::NEG_Y);
        Self {
            view: scene.view,
            projection: scene.projection,
            light_space: scene.light_space,
            camera_position: scene.camera_position().extend(1.0),
            ambient: scene.ambient.extend(0.0),
            directional_direction: direction.extend(0.0),
            directional_color: scene.directional.color.extend(0.0),
            params: Vec4::new(
                config.bloom_threshold,
                config.exposure,
                light_count.min(MAX_LIGHTS) as f32,
                0.0,
            ),
        }
    }
}

/// One point light as the shaders see it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz position, w radius.
    pub position_radius: Vec4,
    /// rgb color, a unused.
    pub color: Vec4,
}

impl From<&PointLight> for GpuPointLight {
    fn from(light: &PointLight) -> Self {
        Self {
            position_radius: light.position.extend(light.radius()),
            color: light.color.extend(1.0),
        }
    }
}

/// Light block, set 0 binding 1.
///
/// # Memory Layout
///
/// - Offset 0: lights (32 * 32 bytes)
/// - Offset 1024: count, padding (16 bytes)
/// - Total size: 1040 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightBlock {
    pub lights: [GpuPointLight; MAX_LIGHTS],
    pub count: u32,
    pub _padding: [u32; 3],
}

impl Default for LightBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl LightBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(lights: &LightList) -> Self {
        let mut block = Self::zeroed();
        for (slot, light) in block.lights.iter_mut().zip(lights.iter()) {
            *slot = light.into();
        }
        block.count = lights.len().min(MAX_LIGHTS) as u32;
        block
    }
}

/// Cube-face matrices of one point light, read by the shadow geometry stage.
///
/// # Memory Layout
///
/// - Offset 0: face view-projections (6 * 64 bytes)
/// - Offset 384: light position, w far plane (16 bytes)
/// - Total size: 400 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ShadowFacesBlock {
    pub faces: [Mat4; 6],
    pub position_far: Vec4,
}

impl ShadowFacesBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// G-buffer vertex push constants.
///
/// The normal matrix is the inverse transpose of the model matrix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ModelPush {
    pub model: Mat4,
    pub normal_matrix: Mat4,
}

impl ModelPush {
    pub fn new(model: Mat4) -> Self {
        Self {
            model,
            normal_matrix: model.inverse().transpose(),
        }
    }
}

/// Directional depth pass push constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DirectionalPush {
    pub light_space: Mat4,
    pub model: Mat4,
}

/// Point shadow push constants: the caster's model matrix and the light,
/// for writing linear depth.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ShadowPush {
    pub model: Mat4,
    pub position_far: Vec4,
}

/// One light volume of the composition pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightVolumePush {
    /// xyz position, w radius. The volume sphere is scaled by the radius.
    pub position_radius: Vec4,
    pub color: Vec4,
}

impl From<&PointLight> for LightVolumePush {
    fn from(light: &PointLight) -> Self {
        let gpu = GpuPointLight::from(light);
        Self {
            position_radius: gpu.position_radius,
            color: gpu.color,
        }
    }
}

/// Separable blur direction in texels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BlurPush {
    pub direction: Vec2,
    pub _padding: Vec2,
}

impl BlurPush {
    pub const HORIZONTAL: Self = Self {
        direction: Vec2::X,
        _padding: Vec2::ZERO,
    };
    pub const VERTICAL: Self = Self {
        direction: Vec2::Y,
        _padding: Vec2::ZERO,
    };
}

/// Cubemap face being filtered, and the roughness of the mip.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct EnvironmentPush {
    pub face: u32,
    pub roughness: f32,
    pub _padding: [u32; 2],
}

impl EnvironmentPush {
    pub fn new(face: u32, roughness: f32) -> Self {
        Self {
            face,
            roughness,
            _padding: [0; 2],
        }
    }
}

/// Tone mapping inputs.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct PostPush {
    pub exposure: f32,
    pub bloom_strength: f32,
    pub _padding: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimum `maxPushConstantsSize` guaranteed by Vulkan.
    const PUSH_LIMIT: usize = 128;

    #[test]
    fn test_uniform_block_sizes() {
        assert_eq!(SceneBlock::SIZE, 272);
        assert_eq!(LightBlock::SIZE, 1040);
        assert_eq!(ShadowFacesBlock::SIZE, 400);
        for size in [SceneBlock::SIZE, LightBlock::SIZE, ShadowFacesBlock::SIZE] {
            assert_eq!(size % 16, 0);
        }
    }

    #[test]
    fn test_push_constants_fit_guaranteed_limit() {
        let sizes = [
            std::mem::size_of::<ModelPush>(),
            std::mem::size_of::<DirectionalPush>(),
            std::mem::size_of::<ShadowPush>(),
            std::mem::size_of::<LightVolumePush>(),
            std::mem::size_of::<BlurPush>(),
            std::mem::size_of::<EnvironmentPush>(),
            std::mem::size_of::<PostPush>(),
        ];
        for size in sizes {
            assert!(size <= PUSH_LIMIT, "{size} bytes");
            assert_eq!(size % 16, 0);
        }
    }

    #[test]
    fn test_light_block_packs_radius() {
        let mut lights = LightList::new();
        lights
            .push(PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 1.0, 0.0)))
            .unwrap();
        let block = LightBlock::new(&lights);
        assert_eq!(block.count, 1);
        let packed = block.lights[0].position_radius;
        assert_eq!(packed.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert!((packed.w - 7.155).abs() < 1e-3);
        assert_eq!(block.lights[1], GpuPointLight::default());
    }

    #[test]
    fn test_scene_block_params() {
        let config = RendererConfig::default();
        let block = SceneBlock::new(&SceneUniforms::default(), &config, 40);
        assert_eq!(block.params.x, config.bloom_threshold);
        assert_eq!(block.params.y, config.exposure);
        assert_eq!(block.params.z, MAX_LIGHTS as f32);
        assert!((block.directional_direction.truncate().length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_model_push_normal_matrix() {
        let model = Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0));
        let push = ModelPush::new(model);
        assert_eq!(push.model, model);
        assert_eq!(push.normal_matrix, model.inverse().transpose());
    }
}
