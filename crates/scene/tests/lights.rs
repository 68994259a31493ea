use glam::Vec3;
use penumbra_core::config::MAX_LIGHTS;
use penumbra_scene::{LightList, PointLight, SceneError, light_radius};

#[test]
fn test_radius_is_monotonic_in_peak_channel() {
    let colors = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.1, 0.05, 0.0),
        Vec3::new(0.0, 0.5, 0.3),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.5, 0.2, 1.0),
        Vec3::new(0.0, 2.0, 0.0),
        Vec3::new(4.0, 4.0, 4.0),
        Vec3::new(0.0, 0.0, 25.0),
    ];
    for pair in colors.windows(2) {
        let (c1, c2) = (pair[0], pair[1]);
        assert!(c1.max_element() < c2.max_element());
        assert!(
            light_radius(c1) < light_radius(c2),
            "radius({c1}) >= radius({c2})"
        );
    }
}

#[test]
fn test_reference_radii() {
    assert!((light_radius(Vec3::new(0.0, 1.0, 0.0)) - 7.155).abs() < 1e-3);
    assert!((light_radius(Vec3::new(0.0, 2.0, 0.0)) - 10.119).abs() < 1e-3);
}

#[test]
fn test_light_list_rejects_overflow_without_dropping() {
    let mut lights = LightList::new();
    for i in 0..MAX_LIGHTS {
        lights
            .push(PointLight::new(Vec3::splat(i as f32), Vec3::ONE))
            .unwrap();
    }

    let overflow = lights.push(PointLight::new(Vec3::ZERO, Vec3::ONE));
    assert_eq!(overflow, Err(SceneError::TooManyLights { max: MAX_LIGHTS }));
    assert_eq!(lights.len(), MAX_LIGHTS);
    assert_eq!(
        lights.get(MAX_LIGHTS - 1).map(|l| l.position),
        Some(Vec3::splat((MAX_LIGHTS - 1) as f32))
    );
}

#[test]
fn test_lights_are_editable_between_frames() {
    let mut lights = LightList::new();
    let index = lights.push(PointLight::default()).unwrap();
    if let Some(light) = lights.get_mut(index) {
        light.color = Vec3::new(0.0, 2.0, 0.0);
    }
    let radius = lights.iter().map(PointLight::radius).next().unwrap();
    assert!((radius - 10.119).abs() < 1e-3);
}
