//! Scene-wide per-frame inputs.

use glam::{Mat4, Vec3};

use crate::light::DirectionalLight;

/// Camera, ambient and sun terms for one frame.
///
/// The renderer packs this into its scene uniform block; the field layout
/// here is not the GPU layout.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub ambient: Vec3,
    pub directional: DirectionalLight,
    /// World to directional-shadow clip space.
    pub light_space: Mat4,
}

impl Default for SceneUniforms {
    fn default() -> Self {
        let directional = DirectionalLight::default();
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            ambient: Vec3::splat(0.03),
            light_space: directional.light_space(Vec3::ZERO, 20.0),
            directional,
        }
    }
}

impl SceneUniforms {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            ..Self::default()
        }
    }

    /// Replaces the sun and recomputes its shadow matrix around `center`.
    pub fn with_directional(
        mut self,
        directional: DirectionalLight,
        center: Vec3,
        half_extent: f32,
    ) -> Self {
        self.directional = directional;
        self.light_space = directional.light_space(center, half_extent);
        self
    }

    pub fn with_ambient(mut self, ambient: Vec3) -> Self {
        self.ambient = ambient;
        self
    }

    /// World-space camera position recovered from the view matrix.
    pub fn camera_position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_position_from_view() {
        let eye = Vec3::new(3.0, 4.0, 5.0);
        let uniforms = SceneUniforms::new(Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y), Mat4::IDENTITY);
        assert!((uniforms.camera_position() - eye).length() < 1e-4);
    }

    #[test]
    fn test_with_directional_updates_light_space() {
        let sun = DirectionalLight {
            direction: Vec3::new(0.0, -1.0, 0.1),
            color: Vec3::ONE,
        };
        let uniforms = SceneUniforms::default().with_directional(sun, Vec3::ZERO, 5.0);
        assert_eq!(uniforms.light_space, sun.light_space(Vec3::ZERO, 5.0));
    }
}
