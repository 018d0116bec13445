//! GPU context management.

use crate::capabilities::{GpuCapabilities, QueueFamilyIndices};
use crate::command::TransferContext;
use crate::error::{GpuError, Result};
use crate::image::{create_image_view, find_depth_format};
use crate::instance::{create_instance, required_device_extensions, select_physical_device};
use crate::memory::{GpuAllocator, GpuBuffer, GpuImage};
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Created once at startup and dropped last; every other GPU object must be
/// destroyed before it.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) transfer: TransferContext,
    pub(crate) depth_format: vk::Format,

    // Queue families and queues
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Graphics and present queue family indices.
    pub const fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue (may equal the graphics queue).
    pub const fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Transfer context for one-shot uploads.
    pub const fn transfer(&self) -> &TransferContext {
        &self.transfer
    }

    /// Depth attachment format chosen for this device.
    pub const fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Alignment for flushing and invalidating mapped memory.
    pub const fn non_coherent_atom_size(&self) -> u64 {
        self.capabilities.non_coherent_atom_size
    }

    /// Memory type index matching `type_filter` with at least `properties`.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        crate::capabilities::find_memory_type(
            &self.capabilities.memory_properties,
            type_filter,
            properties,
        )
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the device is alive for as long as the context
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    /// Create a buffer backed by memory with `properties`.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator
            .lock()
            .create_buffer(size, usage, properties, name)
    }

    /// Free a buffer. Freeing an already freed buffer does nothing.
    pub fn free_buffer(&self, buffer: &mut GpuBuffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    /// Create a single-mip 2D image backed by memory with `properties`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.allocator
            .lock()
            .create_image(&create_info, properties, name)
    }

    /// Free an image. Freeing an already freed image does nothing.
    pub fn free_image(&self, image: &mut GpuImage) -> Result<()> {
        self.allocator.lock().free_image(image)
    }

    /// Create a 2D view for `image`.
    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        // SAFETY: callers pass images created on this device
        unsafe { create_image_view(&self.device, image, format, aspect) }
    }

    /// Record and run a one-shot command buffer, blocking until it completes.
    pub fn execute_one_shot<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = &*self.device;
        // SAFETY: the transfer pool belongs to this device and the call blocks
        // until the recorded work has finished
        unsafe { self.transfer.execute(device, |cmd| f(device, cmd)) }
    }

    /// Create a host-visible staging buffer filled with `data`.
    pub fn create_staging_buffer(&self, data: &[u8], name: &str) -> Result<GpuBuffer> {
        let mut staging = self.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            name,
        )?;
        let written = staging.write_bytes(0, data).and_then(|()| {
            // SAFETY: the buffer was allocated on this device
            unsafe { staging.flush(&self.device, self.non_coherent_atom_size()) }
        });
        if let Err(e) = written {
            self.free_buffer(&mut staging)?;
            return Err(e);
        }
        Ok(staging)
    }

    /// Write `value` to the start of a mapped buffer and flush it.
    pub fn write_mapped<T: bytemuck::Pod>(&self, buffer: &GpuBuffer, value: &T) -> Result<()> {
        buffer.write(std::slice::from_ref(value))?;
        // SAFETY: buffers handed to the context were allocated on its device
        unsafe { buffer.flush(&self.device, self.non_coherent_atom_size()) }
    }

    /// Create a device-local buffer and fill it with `data` through a staging
    /// buffer. `usage` gets `TRANSFER_DST` added.
    pub fn upload_device_local(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let size = data.len() as u64;
        let mut staging = self.create_staging_buffer(data, &format!("{name} staging"))?;

        let result = self
            .create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                name,
            )
            .and_then(|mut buffer| {
                let copied = self.execute_one_shot(|device, cmd| {
                    let region = vk::BufferCopy::default().size(size);
                    // SAFETY: both buffers are live for the duration of the submit
                    unsafe {
                        device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
                    }
                    Ok(())
                });
                match copied {
                    Ok(()) => Ok(buffer),
                    Err(e) => {
                        self.free_buffer(&mut buffer)?;
                        Err(e)
                    }
                }
            });

        self.free_buffer(&mut staging)?;
        result
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // SAFETY: the context is the last owner of the device and instance
        unsafe {
            let _ = self.device.device_wait_idle();

            self.transfer.destroy(&self.device);

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context and a presentation surface for `window`.
    ///
    /// The surface is created first so device selection only accepts adapters
    /// that can present to it.
    pub fn build<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?
            .as_raw();

        // SAFETY: loading the Vulkan library has no preconditions
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        // SAFETY: the entry point was just loaded
        let instance =
            unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation) }?;

        // SAFETY: the handles come from a live window
        let mut surface =
            match unsafe { SurfaceContext::new(&entry, &instance, display, window_handle) } {
                Ok(surface) => surface,
                Err(e) => {
                    // SAFETY: nothing else was created from the instance
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        // SAFETY: instance and surface are live and owned here
        match unsafe { Self::create_context(entry, instance, &mut surface) } {
            Ok(gpu) => Ok((gpu, surface)),
            Err((instance, e)) => {
                // SAFETY: the failed device creation left no children behind
                unsafe {
                    surface.destroy();
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Select the adapter and create the device; hands the instance back on
    /// failure so the caller can tear it down.
    unsafe fn create_context(
        entry: ash::Entry,
        instance: ash::Instance,
        surface: &mut SurfaceContext,
    ) -> std::result::Result<GpuContext, (ash::Instance, GpuError)> {
        // SAFETY: instance and surface are valid
        let (physical_device, queue_families) = match unsafe {
            select_physical_device(&instance, &surface.surface_loader, surface.surface)
        } {
            Ok(selected) => selected,
            Err(e) => return Err((instance, e)),
        };

        // SAFETY: physical device was enumerated from this instance
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::debug!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        // SAFETY: as above
        let depth_format = match unsafe { find_depth_format(&instance, physical_device) } {
            Ok(format) => format,
            Err(e) => return Err((instance, e)),
        };

        let enable_anisotropy = capabilities.max_sampler_anisotropy > 1.0;
        // SAFETY: as above
        let device = match unsafe {
            create_device(&instance, physical_device, &queue_families, enable_anisotropy)
        } {
            Ok(device) => Arc::new(device),
            Err(e) => return Err((instance, e)),
        };

        let fail = |instance: ash::Instance, device: &ash::Device, e: GpuError| {
            // SAFETY: nothing has been created on the device yet
            unsafe { device.destroy_device(None) };
            Err((instance, e))
        };

        // SAFETY: families were validated during selection
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        // SAFETY: device is valid
        let transfer = match unsafe {
            TransferContext::new(&device, queue_families.graphics, graphics_queue)
        } {
            Ok(transfer) => transfer,
            Err(e) => return fail(instance, &device, e),
        };

        // SAFETY: all handles are valid
        let allocator = match unsafe {
            GpuAllocator::new(
                &instance,
                device.clone(),
                physical_device,
                capabilities.memory_properties,
            )
        } {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: pool is unused
                unsafe { transfer.destroy(&device) };
                return fail(instance, &device, e);
            }
        };

        surface.attach_device(&instance, &device);

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            transfer,
            depth_format,
            queue_families,
            graphics_queue,
            present_queue,
        })
    }
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    enable_anisotropy: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(enable_anisotropy);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    // SAFETY: caller guarantees the handles are valid
    let device = unsafe {
        instance
            .create_device(physical_device, &device_create_info, None)
            .map_err(GpuError::from)?
    };

    Ok(device)
}
