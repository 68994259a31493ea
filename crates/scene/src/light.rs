//! Light definitions for the scene.

use glam::{Mat4, Vec3};
use penumbra_core::config::MAX_LIGHTS;

use crate::error::{SceneError, SceneResult};

/// Distance at which a light's contribution is treated as zero.
///
/// Inverse-square falloff cut off where the brightest channel drops below
/// a fixed threshold: `16 * sqrt(max(r, g, b) / 5)`.
pub fn light_radius(color: Vec3) -> f32 {
    16.0 * (color.max_element().max(0.0) / 5.0).sqrt()
}

/// A point light. Its radius follows from its color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    /// Light position in world space
    pub position: Vec3,
    /// Linear RGB color; values above 1 are brighter, not clipped.
    pub color: Vec3,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Effective radius, also the far plane of the light's shadow cube.
    #[inline]
    pub fn radius(&self) -> f32 {
        light_radius(self.color)
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
        }
    }
}

/// Point lights for one frame, bounded by [`MAX_LIGHTS`].
///
/// The renderer reads the list during `end_frame` and never stores it; the
/// caller may edit it freely between frames.
#[derive(Clone, Debug, Default)]
pub struct LightList {
    lights: Vec<PointLight>,
}

impl LightList {
    pub fn new() -> Self {
        Self {
            lights: Vec::with_capacity(MAX_LIGHTS),
        }
    }

    /// Adds a light and returns its slot index.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::TooManyLights`] when the list is full.
    pub fn push(&mut self, light: PointLight) -> SceneResult<usize> {
        if self.lights.len() >= MAX_LIGHTS {
            return Err(SceneError::TooManyLights { max: MAX_LIGHTS });
        }
        self.lights.push(light);
        Ok(self.lights.len() - 1)
    }

    /// Removes the light at `index`, shifting later lights down one slot.
    pub fn remove(&mut self, index: usize) -> Option<PointLight> {
        (index < self.lights.len()).then(|| self.lights.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&PointLight> {
        self.lights.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PointLight> {
        self.lights.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PointLight> {
        self.lights.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PointLight> {
        self.lights.iter_mut()
    }

    pub fn as_slice(&self) -> &[PointLight] {
        &self.lights
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn clear(&mut self) {
        self.lights.clear();
    }
}

impl<'a> IntoIterator for &'a LightList {
    type Item = &'a PointLight;
    type IntoIter = std::slice::Iter<'a, PointLight>;

    fn into_iter(self) -> Self::IntoIter {
        self.lights.iter()
    }
}

/// A directional light (sun-like).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in; normalized on use.
    pub direction: Vec3,
    pub color: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3),
            color: Vec3::splat(0.6),
        }
    }
}

impl DirectionalLight {
    /// Orthographic light-space matrix covering a cube of half-size
    /// `half_extent` around `center`.
    pub fn light_space(&self, center: Vec3, half_extent: f32) -> Mat4 {
        let direction = self.direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let eye = center - direction * half_extent * 2.0;
        let up = if direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(eye, center, up);
        let projection = Mat4::orthographic_rh(
            -half_extent,
            half_extent,
            -half_extent,
            half_extent,
            0.0,
            half_extent * 4.0,
        );
        projection * view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_of_unit_green() {
        let radius = light_radius(Vec3::new(0.0, 1.0, 0.0));
        assert!((radius - 7.155).abs() < 1e-3, "radius = {radius}");
    }

    #[test]
    fn test_radius_of_double_green() {
        let radius = PointLight::new(Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)).radius();
        assert!((radius - 10.119).abs() < 1e-3, "radius = {radius}");
    }

    #[test]
    fn test_radius_uses_peak_channel() {
        assert_eq!(
            light_radius(Vec3::new(0.2, 3.0, 1.0)),
            light_radius(Vec3::new(3.0, 0.0, 0.0))
        );
        assert_eq!(light_radius(Vec3::ZERO), 0.0);
    }

    #[test]
    fn test_light_list_is_bounded() {
        let mut lights = LightList::new();
        for i in 0..MAX_LIGHTS {
            assert_eq!(lights.push(PointLight::default()).unwrap(), i);
        }
        assert!(matches!(
            lights.push(PointLight::default()),
            Err(SceneError::TooManyLights { max }) if max == MAX_LIGHTS
        ));
        assert_eq!(lights.len(), MAX_LIGHTS);
    }

    #[test]
    fn test_light_list_remove() {
        let mut lights = LightList::new();
        lights.push(PointLight::new(Vec3::X, Vec3::ONE)).unwrap();
        lights.push(PointLight::new(Vec3::Y, Vec3::ONE)).unwrap();
        assert_eq!(lights.remove(0).map(|l| l.position), Some(Vec3::X));
        assert_eq!(lights.get(0).map(|l| l.position), Some(Vec3::Y));
        assert!(lights.remove(5).is_none());
    }

    #[test]
    fn test_light_space_maps_center_inside_clip_volume() {
        let sun = DirectionalLight::default();
        let clip = sun.light_space(Vec3::ZERO, 10.0) * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
