//! GPU memory management.

use crate::capabilities::find_memory_type;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Map requested memory properties onto an allocator location.
///
/// Host-visible requests are persistently mapped by the allocator.
pub fn memory_location(properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if properties.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        }
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Expand `[offset, offset + size)` to `atom`-aligned bounds for a flush.
///
/// `limit` is the end of the allocation. When the rounded end passes it the
/// range runs to the end of the memory object instead (`vk::WHOLE_SIZE`).
pub fn aligned_mapped_range(offset: u64, size: u64, atom: u64, limit: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let start = offset / atom * atom;
    let end = (offset + size).div_ceil(atom) * atom;
    if end > limit {
        (start, vk::WHOLE_SIZE)
    } else {
        (start, end - start)
    }
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
        })
    }

    fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        linear: bool,
        name: &str,
    ) -> Result<Allocation> {
        // Fail with the precise reason before the allocator picks its own type
        find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;

        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location(properties),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn release(&mut self, allocation: Allocation) -> Result<()> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Allocate a buffer with memory satisfying `properties`.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device outlives every buffer made through the allocator
        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::from)?
        };

        // SAFETY: the buffer was just created on this device
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(requirements, properties, true, name) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the buffer has no memory bound and is not in use
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the buffer's requirements
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(GpuError::from)?;
        }

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Free a buffer allocation.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.release(allocation)?;
        }

        if buffer.buffer != vk::Buffer::null() {
            // SAFETY: callers free buffers only once the device no longer uses them
            unsafe {
                self.device.destroy_buffer(buffer.buffer, None);
            }
            buffer.buffer = vk::Buffer::null();
        }

        Ok(())
    }

    /// Allocate an image with memory satisfying `properties`.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuImage> {
        // SAFETY: the device outlives every image made through the allocator
        let image = unsafe {
            self.device
                .create_image(create_info, None)
                .map_err(GpuError::from)?
        };

        // SAFETY: the image was just created on this device
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let linear = create_info.tiling == vk::ImageTiling::LINEAR;
        let allocation = match self.allocate(requirements, properties, linear, name) {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the image has no memory bound and is not in use
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // SAFETY: the allocation satisfies the image's requirements
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(GpuError::from)?;
        }

        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
        })
    }

    /// Free an image allocation.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.release(allocation)?;
        }

        if image.image != vk::Image::null() {
            // SAFETY: callers free images only once the device no longer uses them
            unsafe {
                self.device.destroy_image(image.image, None);
            }
            image.image = vk::Image::null();
        }

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        // Dropping the inner allocator frees every VkDeviceMemory block
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
///
/// Freeing twice is a no-op: the allocation is taken and the handle nulled.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Pointer to the persistently mapped memory, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Whether writes are visible to the device without an explicit flush.
    pub fn is_coherent(&self) -> bool {
        self.allocation.as_ref().is_some_and(|a| {
            a.memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        })
    }

    /// Write typed data at the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes to the buffer at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "Data range too large for buffer".to_string(),
            ));
        }

        // SAFETY: `end <= size` was checked above and the mapping covers the buffer
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }

    fn mapped_memory_range(&self, atom: u64) -> Option<vk::MappedMemoryRange<'static>> {
        let allocation = self.allocation.as_ref()?;
        let limit = allocation.offset() + allocation.size();
        let (offset, size) = aligned_mapped_range(allocation.offset(), self.size, atom, limit);
        // SAFETY: the range is only handed to flush/invalidate on the owning device
        Some(
            vk::MappedMemoryRange::default()
                .memory(unsafe { allocation.memory() })
                .offset(offset)
                .size(size),
        )
    }

    /// Make host writes visible to the device. No-op on coherent memory.
    ///
    /// # Safety
    /// The device must own this buffer's memory.
    pub unsafe fn flush(&self, device: &ash::Device, atom: u64) -> Result<()> {
        if self.is_coherent() {
            return Ok(());
        }
        if let Some(range) = self.mapped_memory_range(atom) {
            // SAFETY: caller guarantees the device owns the memory
            unsafe { device.flush_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }
}

/// A GPU image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_visible_requests_are_mapped() {
        assert_eq!(
            memory_location(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            ),
            MemoryLocation::GpuToCpu
        );
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn mapped_range_is_widened_to_atom() {
        assert_eq!(aligned_mapped_range(0, 64, 64, 1024), (0, 64));
        assert_eq!(aligned_mapped_range(10, 100, 64, 1024), (0, 128));
        assert_eq!(aligned_mapped_range(256, 1, 256, 1024), (256, 256));
        // Zero atom is treated as byte granularity
        assert_eq!(aligned_mapped_range(3, 5, 0, 8), (3, 5));
    }

    #[test]
    fn mapped_range_never_passes_allocation_end() {
        // 100-byte dedicated allocation with a 64-byte atom
        assert_eq!(aligned_mapped_range(0, 100, 64, 100), (0, vk::WHOLE_SIZE));
        // Sub-allocation ending exactly on an atom boundary keeps its size
        assert_eq!(aligned_mapped_range(64, 64, 64, 128), (64, 64));
        assert_eq!(aligned_mapped_range(70, 40, 64, 120), (64, vk::WHOLE_SIZE));
    }
}
