//! Integration tests for asset buffers.

use std::path::PathBuf;

use glam::Vec3;
use penumbra_resources::{
    ColorEncoding, MaterialTextures, ResourceError, ShaderLibrary, TextureData, primitives,
};

#[test]
fn test_primitives_are_uploadable() {
    let meshes = [
        primitives::uv_sphere(1.0, 32, 16).unwrap(),
        primitives::plane(20.0, 8.0).unwrap(),
        primitives::cube(1.0).unwrap(),
    ];

    for mesh in &meshes {
        assert!(!mesh.vertices().is_empty());
        assert_eq!(mesh.indices().len() % 3, 0);
        assert_eq!(mesh.vertex_bytes().len(), mesh.vertices().len() * 48);
        assert!(
            mesh.indices()
                .iter()
                .all(|&i| (i as usize) < mesh.vertices().len())
        );
        for vertex in mesh.vertices() {
            assert!((vertex.normal.length() - 1.0).abs() < 1e-4);
        }
    }
}

#[test]
fn test_unit_sphere_bounds_light_volume() {
    let sphere = primitives::uv_sphere(1.0, 16, 8).unwrap();
    let (min, max) = sphere.bounds();
    assert!((min + Vec3::ONE).length() < 1e-3);
    assert!((max - Vec3::ONE).length() < 1e-3);
}

#[test]
fn test_shader_library_reports_missing_file() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("no-such-shader-dir");
    let library = ShaderLibrary::from_dir(&dir);
    match library.load("geometry.vert.spv") {
        Err(ResourceError::MissingShader(path)) => assert!(path.ends_with("geometry.vert.spv")),
        other => panic!("expected MissingShader, got {:?}", other),
    }
}

#[test]
fn test_shader_library_reads_directory() {
    let dir = std::env::temp_dir().join(format!("penumbra-shaders-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut blob = 0x0723_0203u32.to_le_bytes().to_vec();
    blob.extend_from_slice(&[0u8; 16]);
    std::fs::write(dir.join("post.frag.spv"), &blob).unwrap();
    std::fs::write(dir.join("broken.frag.spv"), [1u8, 2, 3]).unwrap();

    let library = ShaderLibrary::from_dir(&dir);
    assert_eq!(library.load("post.frag.spv").unwrap(), blob);
    assert!(matches!(
        library.load("broken.frag.spv"),
        Err(ResourceError::InvalidShader { .. })
    ));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_material_roles_have_expected_encodings() {
    let checker = TextureData::checker(64, 8, [230, 230, 230, 255], [40, 40, 40, 255], ColorEncoding::Srgb);
    let material = MaterialTextures::flat([255; 4], 0.0, 0.8).with_albedo(checker);
    assert_eq!(material.albedo.width(), 64);
    assert_eq!(material.albedo.encoding(), ColorEncoding::Srgb);
    assert_eq!(material.normal.encoding(), ColorEncoding::Linear);
    assert_eq!(material.metallic_roughness.encoding(), ColorEncoding::Linear);
}
