//! Vulkan instance creation and adapter selection.

use crate::capabilities::{DeviceCandidate, QueueFamilyIndices, SurfaceSupport};
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![
        // Standard validation layer
        c"VK_LAYER_KHRONOS_validation",
    ]
}

/// Device extensions every selected adapter must expose.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create a Vulkan instance with the surface extensions `display` needs.
///
/// Missing validation layers are logged and skipped.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Ember")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    #[allow(unused_mut)]
    let mut extension_names: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::SurfaceCreation(format!("No surface extensions for display: {e}")))?
        .to_vec();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    // Only request layers that are actually installed
    let layers = if enable_validation {
        // SAFETY: entry is valid
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers.iter().any(|props| {
                    // SAFETY: the loader null-terminates layer names
                    let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
                    name == *layer
                });
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: entry is valid and all pointers outlive the call
    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok(instance)
}

/// Select the first discrete or integrated GPU that can render to `surface`.
///
/// # Safety
/// The instance, loader and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    // SAFETY: instance is valid
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let required = required_device_extensions();

    for device in devices {
        // SAFETY: device was just enumerated from a valid instance
        let candidate = unsafe { describe_device(instance, surface_loader, surface, device) };
        match candidate.assess(&required) {
            Ok(families) => return Ok((device, families)),
            Err(reason) => tracing::debug!("Skipping adapter {:?}: {:?}", device, reason),
        }
    }

    Err(GpuError::NoSuitableDevice)
}

/// Gather the selection inputs for one adapter.
unsafe fn describe_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> DeviceCandidate {
    // SAFETY: caller guarantees all handles are valid
    unsafe {
        let properties = instance.get_physical_device_properties(device);
        let queue_families = instance.get_physical_device_queue_family_properties(device);

        let present_support = (0u32..)
            .take(queue_families.len())
            .map(|i| {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            })
            .collect();

        let extensions = instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let surface = SurfaceSupport::query(surface_loader, device, surface).unwrap_or_default();

        DeviceCandidate {
            device_type: properties.device_type,
            queue_families,
            present_support,
            extensions,
            surface,
        }
    }
}
