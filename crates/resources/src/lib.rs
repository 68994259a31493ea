//! Asset buffers consumed by the renderer.
//!
//! Everything here is already decoded; this crate performs no file-format
//! parsing. It provides:
//! - Mesh vertex/index arrays and built-in primitives
//! - RGBA8 texture buffers, sRGB or linear, and cubemap faces
//! - Material texture sets
//! - A library of pre-compiled SPIR-V blobs keyed by file name

mod error;

pub mod material;
pub mod mesh;
pub mod primitives;
pub mod shader_library;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use material::MaterialTextures;
pub use mesh::MeshData;
pub use shader_library::ShaderLibrary;
pub use texture::{ColorEncoding, CubeFaces, TextureData};
