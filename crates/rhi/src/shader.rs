//! Shader modules.
//!
//! Shaders arrive as pre-compiled SPIR-V blobs. [`Shader`] validates the
//! blob, creates the `VkShaderModule` and remembers which pipeline stage it
//! feeds. Every module uses `main` as its entry point.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use penumbra_rhi::device::Device;
//! use penumbra_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>, blob: &[u8]) -> Result<(), penumbra_rhi::RhiError> {
//! let shader = Shader::from_spirv_bytes(device, blob, ShaderStage::Geometry)?;
//! let _stage_info = shader.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a shader module is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    /// Used to replicate shadow-caster triangles onto the six cube faces.
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        }
    }

    /// Conventional file extension of a compiled blob for this stage.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert.spv",
            ShaderStage::Geometry => "geom.spv",
            ShaderStage::Fragment => "frag.spv",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decodes a SPIR-V blob into words, checking length and magic number.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {}",
            bytes.len()
        )));
    }
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("Failed to read SPIR-V: {}", e)))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(RhiError::ShaderError(
            "SPIR-V magic number mismatch".to_string(),
        ));
    }
    Ok(words)
}

/// Owned shader module.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Creates a shader module from a SPIR-V blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not SPIR-V or module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
    ) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Created {} shader module ({} words)", stage, code.len());
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation; borrows the module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Geometry.to_vk_stage(),
            vk::ShaderStageFlags::GEOMETRY
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Geometry), "geometry");
        assert_eq!(ShaderStage::Fragment.extension(), "frag.spv");
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        assert!(spirv_words(&[0u8; 5]).is_err());
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_spirv_words_checks_magic() {
        let mut blob = SPIRV_MAGIC.to_le_bytes().to_vec();
        blob.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = spirv_words(&blob).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);

        assert!(spirv_words(&[1, 2, 3, 4]).is_err());
    }
}
