//! Built-in meshes.
//!
//! All primitives are centred on the origin with counter-clockwise front
//! faces seen from outside, unit-length normals and tangents along +u.

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3, Vec4};
use penumbra_rhi::vertex::Vertex;

use crate::error::ResourceResult;
use crate::mesh::MeshData;

/// UV sphere with `sectors` slices around Y and `stacks` bands pole to pole.
pub fn uv_sphere(radius: f32, sectors: u32, stacks: u32) -> ResourceResult<MeshData> {
    let sectors = sectors.max(3);
    let stacks = stacks.max(2);

    let mut vertices = Vec::with_capacity(((sectors + 1) * (stacks + 1)) as usize);
    for i in 0..=stacks {
        let v = i as f32 / stacks as f32;
        let phi = v * PI;
        for j in 0..=sectors {
            let u = j as f32 / sectors as f32;
            let theta = u * TAU;
            let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), -phi.sin() * theta.sin());
            let tangent = Vec3::new(-theta.sin(), 0.0, -theta.cos());
            vertices.push(Vertex::new(
                normal * radius,
                normal,
                Vec2::new(u, v),
                tangent.extend(1.0),
            ));
        }
    }

    let row = sectors + 1;
    let mut indices = Vec::with_capacity((sectors * stacks * 6) as usize);
    for i in 0..stacks {
        for j in 0..sectors {
            let k1 = i * row + j;
            let k2 = k1 + row;
            // The pole rows collapse to a point; skip their degenerate halves.
            if i != 0 {
                indices.extend([k1, k2, k1 + 1]);
            }
            if i != stacks - 1 {
                indices.extend([k1 + 1, k2, k2 + 1]);
            }
        }
    }

    MeshData::new(vertices, indices)
}

/// Square in the XZ plane facing +Y, with UVs repeating `uv_repeat` times.
pub fn plane(size: f32, uv_repeat: f32) -> ResourceResult<MeshData> {
    let h = size * 0.5;
    let tangent = Vec4::new(1.0, 0.0, 0.0, 1.0);
    let corners = [
        (Vec3::new(-h, 0.0, -h), Vec2::new(0.0, 0.0)),
        (Vec3::new(h, 0.0, -h), Vec2::new(uv_repeat, 0.0)),
        (Vec3::new(h, 0.0, h), Vec2::new(uv_repeat, uv_repeat)),
        (Vec3::new(-h, 0.0, h), Vec2::new(0.0, uv_repeat)),
    ];
    let vertices = corners
        .into_iter()
        .map(|(p, uv)| Vertex::new(p, Vec3::Y, uv, tangent))
        .collect();
    MeshData::new(vertices, vec![0, 3, 2, 0, 2, 1])
}

/// Axis-aligned cube with an edge length of `size`.
pub fn cube(size: f32) -> ResourceResult<MeshData> {
    let h = size * 0.5;
    // (normal, u axis, v axis) with u x v = normal.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let corners = [
            (-u - v, Vec2::new(0.0, 1.0)),
            (u - v, Vec2::new(1.0, 1.0)),
            (u + v, Vec2::new(1.0, 0.0)),
            (-u + v, Vec2::new(0.0, 0.0)),
        ];
        for (offset, uv) in corners {
            vertices.push(Vertex::new((normal + offset) * h, normal, uv, u.extend(1.0)));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::new(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every triangle's geometric normal agrees with its vertex normals.
    fn assert_outward_ccw(mesh: &MeshData) {
        let v = mesh.vertices();
        for tri in mesh.indices().chunks_exact(3) {
            let [a, b, c] = [v[tri[0] as usize], v[tri[1] as usize], v[tri[2] as usize]];
            let face = (b.position - a.position).cross(c.position - a.position);
            if face.length_squared() < 1e-12 {
                continue;
            }
            let shading = a.normal + b.normal + c.normal;
            assert!(face.dot(shading) > 0.0, "triangle {:?} winds inward", tri);
        }
    }

    #[test]
    fn test_sphere_winding_and_radius() {
        let sphere = uv_sphere(2.0, 16, 8).unwrap();
        assert_outward_ccw(&sphere);
        for vertex in sphere.vertices() {
            assert!((vertex.position.length() - 2.0).abs() < 1e-4);
            assert!(vertex.tangent.truncate().dot(vertex.normal).abs() < 1e-4);
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = plane(10.0, 4.0).unwrap();
        assert_outward_ccw(&plane);
        assert_eq!(plane.bounds(), (Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 0.0, 5.0)));
    }

    #[test]
    fn test_cube_winding() {
        let cube = cube(1.0).unwrap();
        assert_eq!(cube.vertices().len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_outward_ccw(&cube);
    }
}
