//! Pre-compiled SPIR-V blobs keyed by file name.
//!
//! Blobs are looked up in memory first, then read from the library's
//! directory. Nothing is compiled here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

const SPIRV_MAGIC: [u8; 4] = 0x0723_0203u32.to_le_bytes();

/// Source of shader blobs for the renderer's passes.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    dir: Option<PathBuf>,
    blobs: HashMap<String, Vec<u8>>,
}

impl ShaderLibrary {
    /// Library reading `<dir>/<name>` on demand.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            blobs: HashMap::new(),
        }
    }

    /// Library with no directory; every blob must be inserted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Registers a blob under `name`, shadowing any file of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidShader`] if `bytes` is not SPIR-V.
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> ResourceResult<()> {
        let name = name.into();
        check_spirv(&name, &bytes)?;
        self.blobs.insert(name, bytes);
        Ok(())
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the blob for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::MissingShader`] if neither memory nor the
    /// directory holds it, or [`ResourceError::InvalidShader`] if the file
    /// is not SPIR-V.
    pub fn load(&self, name: &str) -> ResourceResult<Vec<u8>> {
        if let Some(bytes) = self.blobs.get(name) {
            return Ok(bytes.clone());
        }

        let Some(dir) = self.dir.as_ref() else {
            return Err(ResourceError::MissingShader(PathBuf::from(name)));
        };
        let path = dir.join(name);
        if !path.is_file() {
            return Err(ResourceError::MissingShader(path));
        }
        let bytes = std::fs::read(&path)?;
        check_spirv(name, &bytes)?;
        debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
        Ok(bytes)
    }
}

fn check_spirv(name: &str, bytes: &[u8]) -> ResourceResult<()> {
    let invalid = |reason: String| ResourceError::InvalidShader {
        name: name.to_string(),
        reason,
    };
    if bytes.len() < 20 || !bytes.len().is_multiple_of(4) {
        return Err(invalid(format!(
            "{} bytes is not a whole SPIR-V module",
            bytes.len()
        )));
    }
    if bytes[..4] != SPIRV_MAGIC {
        return Err(invalid("missing SPIR-V magic number".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_module() -> Vec<u8> {
        let mut bytes = SPIRV_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn test_in_memory_lookup() {
        let mut library = ShaderLibrary::in_memory();
        library.insert("post.frag.spv", fake_module()).unwrap();
        assert_eq!(library.load("post.frag.spv").unwrap().len(), 20);
        assert!(matches!(
            library.load("bloom.frag.spv"),
            Err(ResourceError::MissingShader(_))
        ));
    }

    #[test]
    fn test_insert_rejects_non_spirv() {
        let mut library = ShaderLibrary::in_memory();
        assert!(library.insert("bad.spv", vec![0u8; 20]).is_err());
        assert!(library.insert("short.spv", SPIRV_MAGIC.to_vec()).is_err());
    }
}
