//! GPU capability detection.
//!
//! Everything the device selection and swapchain code needs to decide is
//! expressed as plain values here: queue families, surface support, extension
//! presence, memory types. The decisions themselves are pure functions so the
//! same logic serves both [`crate::instance`] and [`crate::swapchain`] and can be
//! exercised without a GPU.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

use crate::error::{GpuError, Result};

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Discrete, integrated, virtual, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    // Memory info
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Raw memory type and heap table
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    // Limits
    /// Alignment for flushing/invalidating non-coherent mapped ranges
    pub non_coherent_atom_size: u64,
    /// Maximum push constant block size in bytes
    pub max_push_constants_size: u32,
    /// Minimum alignment of uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Maximum sampler anisotropy (1.0 when unsupported)
    pub max_sampler_anisotropy: f32,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: caller guarantees handles are valid
        let (properties, memory_properties, features, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                // SAFETY: the driver null-terminates extension names
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        // SAFETY: the driver null-terminates the device name
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let max_sampler_anisotropy = if features.sampler_anisotropy == vk::TRUE {
            properties.limits.max_sampler_anisotropy
        } else {
            1.0
        };

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            memory_properties,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            max_push_constants_size: properties.limits.max_push_constants_size,
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy,
            available_extensions,
        }
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Graphics and present queue family indices for one device/surface pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether one family serves both roles.
    #[inline]
    pub const fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// The distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Sharing mode and family list for resources touched by both queues.
    ///
    /// Exclusive when the families coincide, concurrent across both otherwise.
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, self.unique())
        }
    }
}

/// Pick graphics and present families.
///
/// A single family that can do both wins; otherwise the first graphics family
/// is paired with the first present-capable family. `supports_present` is asked
/// per family index.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;

    for (i, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }
        let is_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let can_present = supports_present(i);

        if is_graphics && can_present {
            return Some(QueueFamilyIndices {
                graphics: i,
                present: i,
            });
        }
        if is_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if can_present && present.is_none() {
            present = Some(i);
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
    })
}

/// What a surface offers on a given device.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// At least one format and one present mode to choose from.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Query what `surface` supports on `physical_device`.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn query(
        loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        // SAFETY: caller guarantees handles are valid
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }
}

/// Only real GPUs are considered; CPU and virtual adapters are skipped.
#[inline]
pub fn is_supported_device_type(device_type: vk::PhysicalDeviceType) -> bool {
    matches!(
        device_type,
        vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::INTEGRATED_GPU
    )
}

/// Required extensions that are absent from `available`.
pub fn missing_extensions(available: &HashSet<String>, required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.contains(name))
        .collect()
}

/// First memory type whose bit is set in `type_filter` and whose flags are a
/// superset of `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory
        .memory_types
        .iter()
        .take(memory.memory_type_count as usize)
        .zip(0u32..)
        .find(|(ty, i)| type_filter & (1 << i) != 0 && ty.property_flags.contains(properties))
        .map(|(_, i)| i)
        .ok_or(GpuError::NoMatchingMemoryType {
            type_filter,
            properties,
        })
}

/// Why a device was passed over during selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    DeviceType(vk::PhysicalDeviceType),
    NoQueueFamilies,
    MissingExtensions(Vec<String>),
    InadequateSurface,
}

/// Everything device selection needs to know about one adapter.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Present support per queue family, same order as `queue_families`.
    pub present_support: Vec<bool>,
    pub extensions: HashSet<String>,
    pub surface: SurfaceSupport,
}

impl DeviceCandidate {
    /// Accept the device and return its queue families, or say why not.
    pub fn assess(
        &self,
        required_extensions: &[&CStr],
    ) -> std::result::Result<QueueFamilyIndices, Rejection> {
        if !is_supported_device_type(self.device_type) {
            return Err(Rejection::DeviceType(self.device_type));
        }

        let families = select_queue_families(&self.queue_families, |i| {
            self.present_support
                .get(i as usize)
                .copied()
                .unwrap_or(false)
        })
        .ok_or(Rejection::NoQueueFamilies)?;

        let missing = missing_extensions(&self.extensions, required_extensions);
        if !missing.is_empty() {
            return Err(Rejection::MissingExtensions(missing));
        }

        if !self.surface.is_adequate() {
            return Err(Rejection::InadequateSurface);
        }

        Ok(families)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn memory_table(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    fn adequate_surface() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn prefers_shared_graphics_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 0 cannot present, family 2 can do both.
        let picked = select_queue_families(&families, |i| i != 0).unwrap();
        assert_eq!(picked.graphics, 2);
        assert_eq!(picked.present, 2);
        assert!(picked.is_shared());
        assert_eq!(picked.sharing(), (vk::SharingMode::EXCLUSIVE, Vec::new()));
    }

    #[test]
    fn falls_back_to_distinct_families_with_concurrent_sharing() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let picked = select_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(
            picked,
            QueueFamilyIndices {
                graphics: 0,
                present: 1
            }
        );
        assert_eq!(picked.sharing(), (vk::SharingMode::CONCURRENT, vec![0, 1]));
    }

    #[test]
    fn no_present_family_means_no_selection() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let picked = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(picked.graphics, 1);
    }

    #[test]
    fn memory_type_must_match_filter_and_flags() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&table, 0b111, wanted).unwrap(), 2);
        // Superset match: HOST_VISIBLE alone accepts type 1 first.
        assert_eq!(
            find_memory_type(&table, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        // Filter excludes type 2.
        assert!(matches!(
            find_memory_type(&table, 0b011, wanted),
            Err(GpuError::NoMatchingMemoryType { .. })
        ));
    }

    #[test]
    fn memory_types_past_count_are_not_considered() {
        let mut table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        table.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert!(find_memory_type(&table, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn reports_missing_extensions() {
        let available: HashSet<String> = ["VK_KHR_swapchain".to_string()].into_iter().collect();
        assert!(missing_extensions(&available, &[ash::khr::swapchain::NAME]).is_empty());
        assert_eq!(
            missing_extensions(&HashSet::new(), &[ash::khr::swapchain::NAME]),
            vec!["VK_KHR_swapchain".to_string()]
        );
    }

    #[test]
    fn candidate_assessment() {
        let mut candidate = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            queue_families: vec![family(vk::QueueFlags::GRAPHICS)],
            present_support: vec![true],
            extensions: ["VK_KHR_swapchain".to_string()].into_iter().collect(),
            surface: adequate_surface(),
        };
        let required = [ash::khr::swapchain::NAME];
        assert!(candidate.assess(&required).is_ok());

        candidate.surface.present_modes.clear();
        assert_eq!(candidate.assess(&required), Err(Rejection::InadequateSurface));

        candidate.device_type = vk::PhysicalDeviceType::CPU;
        assert!(matches!(
            candidate.assess(&required),
            Err(Rejection::DeviceType(_))
        ));
    }
}
