//! Surface management for windowed rendering.
//!
//! The surface is created from raw window handles before device selection, so
//! the chosen adapter is guaranteed to be able to present to it.

use crate::capabilities::SurfaceSupport;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{Swapchain, SwapchainConfig};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Surface context for windowed rendering.
///
/// Owns the Vulkan surface and the extension loaders needed to build
/// swapchains for it. Must be destroyed before the [`GpuContext`].
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader, set once the logical device exists.
    swapchain_loader: Option<ash::khr::swapchain::Device>,
}

impl SurfaceContext {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The entry and instance must be valid and the handles must refer to a
    /// live window that outlives the surface.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        // SAFETY: caller guarantees the handles are valid
        let surface = unsafe {
            ash_window::create_surface(entry, instance, display, window, None)
                .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self {
            surface,
            surface_loader,
            swapchain_loader: None,
        })
    }

    /// Bind the swapchain loader to the logical device.
    pub(crate) fn attach_device(&mut self, instance: &ash::Instance, device: &ash::Device) {
        self.swapchain_loader = Some(ash::khr::swapchain::Device::new(instance, device));
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Surface has no device attached".to_string()))
    }

    /// Query what the surface supports on the context's device.
    pub fn support(&self, gpu: &GpuContext) -> Result<SurfaceSupport> {
        // SAFETY: surface and physical device both belong to gpu's instance
        unsafe { SurfaceSupport::query(&self.surface_loader, gpu.physical_device(), self.surface) }
    }

    /// Create a swapchain for this surface.
    ///
    /// `old_swapchain` is handed to the driver for resource reuse; the caller
    /// still destroys it afterwards.
    ///
    /// # Safety
    /// The GPU context must be valid and `old_swapchain` must not be in use.
    pub unsafe fn create_swapchain(
        &self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Swapchain> {
        let support = self.support(gpu)?;
        let config = SwapchainConfig::choose(&support, width, height, vsync)?;

        // SAFETY: caller guarantees the context is valid
        unsafe {
            Swapchain::new(
                gpu,
                self.swapchain_loader()?,
                self.surface,
                &config,
                gpu.depth_format(),
                old_swapchain,
            )
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created from this surface may still exist.
    pub unsafe fn destroy(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            // SAFETY: caller guarantees the surface is unused
            unsafe { self.surface_loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
        }
    }
}
