//! Mesh vertex and index arrays.

use glam::{Vec2, Vec3, Vec4};
use penumbra_rhi::vertex::Vertex;

use crate::error::{ResourceError, ResourceResult};

/// Indexed triangle list ready for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl MeshData {
    /// Wraps interleaved vertices and `u32` indices.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidMesh`] for an empty mesh, an index
    /// count that is not a multiple of three, or an out-of-range index.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> ResourceResult<Self> {
        validate(vertices.len(), &indices)?;
        Ok(Self { vertices, indices })
    }

    /// Builds a mesh from separate attribute arrays of equal length.
    pub fn from_arrays(
        positions: &[Vec3],
        uvs: &[Vec2],
        normals: &[Vec3],
        tangents: &[Vec4],
        indices: Vec<u32>,
    ) -> ResourceResult<Self> {
        let n = positions.len();
        if uvs.len() != n || normals.len() != n || tangents.len() != n {
            return Err(ResourceError::InvalidMesh(format!(
                "attribute lengths differ: {} positions, {} uvs, {} normals, {} tangents",
                n,
                uvs.len(),
                normals.len(),
                tangents.len()
            )));
        }
        let vertices = positions
            .iter()
            .zip(uvs)
            .zip(normals)
            .zip(tangents)
            .map(|(((&p, &uv), &normal), &tangent)| Vertex::new(p, normal, uv, tangent))
            .collect();
        Self::new(vertices, indices)
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), v| (min.min(v.position), max.max(v.position)),
        )
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

fn validate(vertex_count: usize, indices: &[u32]) -> ResourceResult<()> {
    if vertex_count == 0 || indices.is_empty() {
        return Err(ResourceError::InvalidMesh(
            "mesh needs at least one vertex and one triangle".to_string(),
        ));
    }
    if !indices.len().is_multiple_of(3) {
        return Err(ResourceError::InvalidMesh(format!(
            "{} indices do not form whole triangles",
            indices.len()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(ResourceError::InvalidMesh(format!(
            "index {} out of range for {} vertices",
            bad, vertex_count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<Vertex> {
        [Vec3::ZERO, Vec3::X, Vec3::Y]
            .into_iter()
            .map(|p| Vertex::new(p, Vec3::Z, Vec2::ZERO, Vec4::new(1.0, 0.0, 0.0, 1.0)))
            .collect()
    }

    #[test]
    fn test_mesh_validation() {
        assert!(MeshData::new(triangle(), vec![0, 1, 2]).is_ok());
        assert!(MeshData::new(triangle(), vec![0, 1]).is_err());
        assert!(MeshData::new(triangle(), vec![0, 1, 3]).is_err());
        assert!(MeshData::new(Vec::new(), Vec::new()).is_err());
    }

    #[test]
    fn test_from_arrays_rejects_mismatched_lengths() {
        let result = MeshData::from_arrays(
            &[Vec3::ZERO, Vec3::X, Vec3::Y],
            &[Vec2::ZERO; 2],
            &[Vec3::Z; 3],
            &[Vec4::X; 3],
            vec![0, 1, 2],
        );
        assert!(matches!(result, Err(ResourceError::InvalidMesh(_))));
    }

    #[test]
    fn test_bounds_and_bytes() {
        let mesh = MeshData::new(triangle(), vec![0, 1, 2]).unwrap();
        assert_eq!(mesh.bounds(), (Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
        assert_eq!(mesh.vertex_bytes().len(), 3 * 48);
        assert_eq!(mesh.index_bytes().len(), 12);
        assert_eq!(mesh.triangle_count(), 1);
    }
}
