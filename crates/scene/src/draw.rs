//! Draw-call queue entries.

use glam::Mat4;

/// Opaque reference to a mesh uploaded to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Opaque reference to a material's descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(u32);

impl MaterialHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One queued draw: a mesh and its model matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub mesh: MeshHandle,
    pub transform: Mat4,
}

impl DrawCall {
    pub fn new(mesh: MeshHandle, transform: Mat4) -> Self {
        Self { mesh, transform }
    }
}
