//! Per-frame scene inputs.
//!
//! This crate holds what the application hands the renderer each frame:
//! - Point lights, their derived radius, and the bounded light list
//! - The directional light and scene-wide uniforms
//! - Mesh and material handles, and the draw calls that reference them

mod error;

pub mod draw;
pub mod light;
pub mod uniforms;

pub use draw::{DrawCall, MaterialHandle, MeshHandle};
pub use error::{SceneError, SceneResult};
pub use light::{DirectionalLight, LightList, PointLight, light_radius};
pub use uniforms::SceneUniforms;
