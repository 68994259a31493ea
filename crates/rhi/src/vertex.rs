//! Mesh vertex layout shared by the geometry, shadow and light-volume passes.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Interleaved mesh vertex.
///
/// | location | field      | format    | offset |
/// |----------|------------|-----------|--------|
/// | 0        | `position` | vec3      | 0      |
/// | 1        | `normal`   | vec3      | 12     |
/// | 2        | `uv`       | vec2      | 24     |
/// | 3        | `tangent`  | vec4      | 32     |
///
/// `tangent.w` carries the bitangent sign.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, uv: Vec2, tangent: Vec4) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// All four attributes, for the geometry pass.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            Self::attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            Self::attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            Self::attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
            Self::attribute(3, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, tangent)),
        ]
    }

    /// Position only, for depth-only shadow passes and light volumes.
    pub fn position_attribute_description() -> [vk::VertexInputAttributeDescription; 1] {
        [Self::attribute(
            0,
            vk::Format::R32G32B32_SFLOAT,
            offset_of!(Vertex, position),
        )]
    }

    fn attribute(
        location: u32,
        format: vk::Format,
        offset: usize,
    ) -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription {
            binding: 0,
            location,
            format,
            offset: offset as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(Vertex::binding_description().stride, 48);
    }

    #[test]
    fn test_vertex_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[3].location, 3);
    }

    #[test]
    fn test_position_only_layout_matches_full_layout() {
        let position = Vertex::position_attribute_description()[0];
        let full = Vertex::attribute_descriptions()[0];
        assert_eq!(position.offset, full.offset);
        assert_eq!(position.format, full.format);
        assert_eq!(position.location, 0);
    }

    #[test]
    fn test_vertex_is_pod() {
        let vertex = Vertex::new(Vec3::X, Vec3::Y, Vec2::splat(0.5), Vec4::new(1.0, 0.0, 0.0, -1.0));
        let bytes = bytemuck::bytes_of(&vertex);
        let back: &Vertex = bytemuck::from_bytes(bytes);
        assert_eq!(*back, vertex);
    }
}
