//! Renderer configuration.
//!
//! Capacities that size GPU pools and per-frame replication are fixed at
//! compile time and live here as constants. Everything a user may reasonably
//! tune between runs lives in [`RendererConfig`], which can be read from
//! `PENUMBRA_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Number of frame slots cycled round-robin by the frame orchestrator.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Maximum number of simultaneously active point lights.
pub const MAX_LIGHTS: usize = 32;

/// Maximum number of material descriptor sets.
pub const MAX_MATERIALS: u32 = 128;

/// Edge length of the directional shadow map.
pub const DIRECTIONAL_SHADOW_RESOLUTION: u32 = 512;

/// Edge length of each face of a point-light shadow cubemap.
pub const POINT_SHADOW_RESOLUTION: u32 = 256;

/// Runtime settings for the renderer and the demo application.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
    /// Directory holding the compiled per-pass `.spv` files.
    pub shader_dir: PathBuf,
    /// Enable the Khronos validation layer if it is installed.
    pub enable_validation: bool,
    /// Luminance above which composition output feeds the bloom chain.
    pub bloom_threshold: f32,
    /// Exposure applied by the tone-mapping post pass.
    pub exposure: f32,
    /// Face size of the pre-filtered environment cubemap.
    pub environment_resolution: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: String::from("Penumbra"),
            shader_dir: PathBuf::from("shaders"),
            enable_validation: cfg!(debug_assertions),
            bloom_threshold: 1.0,
            exposure: 1.0,
            environment_resolution: 128,
        }
    }
}

impl RendererConfig {
    /// Reads overrides from the process environment.
    ///
    /// See [`RendererConfig::from_lookup`] for the recognised keys.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from defaults plus overrides supplied by `lookup`.
    ///
    /// Recognised keys: `PENUMBRA_WIDTH`, `PENUMBRA_HEIGHT`, `PENUMBRA_TITLE`,
    /// `PENUMBRA_SHADER_DIR`, `PENUMBRA_VALIDATION`, `PENUMBRA_BLOOM_THRESHOLD`,
    /// `PENUMBRA_EXPOSURE`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a value is present but malformed, or
    /// when a dimension is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(width) = parse_var::<u32>(&lookup, "PENUMBRA_WIDTH")? {
            config.width = width;
        }
        if let Some(height) = parse_var::<u32>(&lookup, "PENUMBRA_HEIGHT")? {
            config.height = height;
        }
        if let Some(title) = lookup("PENUMBRA_TITLE") {
            config.title = title;
        }
        if let Some(dir) = lookup("PENUMBRA_SHADER_DIR") {
            config.shader_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("PENUMBRA_VALIDATION") {
            config.enable_validation = parse_flag("PENUMBRA_VALIDATION", &raw)?;
        }
        if let Some(threshold) = parse_var::<f32>(&lookup, "PENUMBRA_BLOOM_THRESHOLD")? {
            config.bloom_threshold = threshold;
        }
        if let Some(exposure) = parse_var::<f32>(&lookup, "PENUMBRA_EXPOSURE")? {
            config.exposure = exposure;
        }

        if config.width == 0 || config.height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                config.width, config.height
            )));
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}"))),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_capacity_constants() {
        assert_eq!(FRAMES_IN_FLIGHT, 2);
        assert_eq!(MAX_LIGHTS, 32);
        assert_eq!(MAX_MATERIALS, 128);
        assert_eq!(DIRECTIONAL_SHADOW_RESOLUTION, 512);
        assert_eq!(POINT_SHADOW_RESOLUTION, 256);
    }

    #[test]
    fn test_from_lookup_without_overrides_is_default() {
        let config = RendererConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_from_lookup_applies_overrides() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            ("PENUMBRA_WIDTH", "1920"),
            ("PENUMBRA_HEIGHT", " 1080 "),
            ("PENUMBRA_SHADER_DIR", "/opt/shaders"),
            ("PENUMBRA_VALIDATION", "off"),
            ("PENUMBRA_EXPOSURE", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.shader_dir, PathBuf::from("/opt/shaders"));
        assert!(!config.enable_validation);
        assert_eq!(config.exposure, 0.5);
        assert_eq!(config.bloom_threshold, 1.0);
    }

    #[test]
    fn test_from_lookup_rejects_malformed_number() {
        let result = RendererConfig::from_lookup(lookup_from(&[("PENUMBRA_WIDTH", "wide")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_lookup_rejects_zero_extent() {
        let result = RendererConfig::from_lookup(lookup_from(&[("PENUMBRA_HEIGHT", "0")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("K", "YES").unwrap());
        assert!(!parse_flag("K", "0").unwrap());
        assert!(parse_flag("K", "maybe").is_err());
    }
}
