//! Physical device (GPU) selection.
//!
//! A device is usable when it has a graphics queue, can present to the
//! window surface, exposes the swapchain extension and supports the two
//! optional features the renderer depends on: geometry shaders (cubemap
//! face replication for point-light shadows) and sampler anisotropy.
//! Among usable devices the highest [`rate_device`] score wins.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Device extensions every candidate GPU must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices used by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Family that can present to the window surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// True when both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// The distinct families, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Information about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families selected for this device.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Device name as reported by the driver.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Human-readable device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total size of device-local heaps in bytes.
    pub fn device_local_memory(&self) -> u64 {
        let heaps = &self.memory_properties.memory_heaps
            [..self.memory_properties.memory_heap_count as usize];
        heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the best GPU able to render and present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device satisfies the
/// requirements listed in the module documentation.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;
    for device in devices {
        let Some(candidate) = inspect_device(instance, device, surface, surface_loader)? else {
            continue;
        };
        let score = rate_device(&candidate);
        debug!(
            "GPU '{}' ({}) scored {}",
            candidate.device_name(),
            candidate.device_type_name(),
            score
        );
        if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
            best = Some((candidate, score));
        }
    }

    let Some((selected, _)) = best else {
        warn!("No GPU satisfies the renderer's requirements");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}), {} MiB device-local",
        selected.device_name(),
        selected.device_type_name(),
        selected.device_local_memory() / (1024 * 1024)
    );
    Ok(selected)
}

fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<Option<PhysicalDeviceInfo>, RhiError> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let queue_families = find_queue_families(instance, device, surface, surface_loader)?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
    let has_extension = |wanted: &CStr| {
        extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == wanted))
    };
    let extensions_present = REQUIRED_DEVICE_EXTENSIONS.iter().all(|ext| has_extension(ext));

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    };

    let missing = missing_requirements(&features, &queue_families, extensions_present);
    if !missing.is_empty() {
        debug!("GPU '{}' skipped: missing {:?}", info.device_name(), missing);
        return Ok(None);
    }

    Ok(Some(info))
}

/// Lists every requirement the device fails, empty when it is usable.
fn missing_requirements(
    features: &vk::PhysicalDeviceFeatures,
    queue_families: &QueueFamilyIndices,
    extensions_present: bool,
) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if queue_families.graphics_family.is_none() {
        missing.push("graphics queue");
    }
    if queue_families.present_family.is_none() {
        missing.push("present queue");
    }
    if !extensions_present {
        missing.push("VK_KHR_swapchain");
    }
    if features.geometry_shader == vk::FALSE {
        missing.push("geometryShader");
    }
    if features.sampler_anisotropy == vk::FALSE {
        missing.push("samplerAnisotropy");
    }
    missing
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<QueueFamilyIndices, RhiError> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(device, i, surface)?
        };

        // A family that does both avoids concurrent swapchain sharing.
        if graphics && present {
            return Ok(QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            });
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    Ok(indices)
}

/// Scores a usable device. Discrete GPUs dominate, then VRAM breaks ties.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    let vram_mb = (info.device_local_memory() / (1024 * 1024)).min(8_000) as u32;
    type_score + vram_mb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .geometry_shader(true)
            .sampler_anisotropy(true)
    }

    fn complete_families() -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        }
    }

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        assert!(!QueueFamilyIndices::default().is_complete());
        assert!(complete_families().is_complete());
    }

    #[test]
    fn test_unique_families() {
        assert_eq!(complete_families().unique_families(), vec![0, 1]);
        let shared = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(2),
        };
        assert_eq!(shared.unique_families(), vec![2]);
    }

    #[test]
    fn test_missing_requirements_none() {
        assert!(missing_requirements(&full_features(), &complete_families(), true).is_empty());
    }

    #[test]
    fn test_missing_requirements_geometry_shader() {
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
        assert_eq!(
            missing_requirements(&features, &complete_families(), true),
            vec!["geometryShader"]
        );
    }

    #[test]
    fn test_missing_requirements_collects_all() {
        let missing = missing_requirements(
            &vk::PhysicalDeviceFeatures::default(),
            &QueueFamilyIndices::default(),
            false,
        );
        assert_eq!(missing.len(), 5);
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let base = PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            features: full_features(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: complete_families(),
        };
        let mut discrete = base.clone();
        discrete.properties.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        let mut integrated = base;
        integrated.properties.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;

        assert!(rate_device(&discrete) > rate_device(&integrated));
    }
}
