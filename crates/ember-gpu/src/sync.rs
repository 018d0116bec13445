//! Synchronization primitives and per-frame slot resources.

use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use ash::vk;

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    // SAFETY: caller guarantees the device is valid
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    // SAFETY: caller guarantees the device is valid
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// Expiry of `timeout_ns` is reported as [`FenceStatus::TimedOut`], not an error.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<FenceStatus> {
    // SAFETY: caller guarantees the handles are valid
    match unsafe { device.wait_for_fences(&[fence], true, timeout_ns) } {
        Ok(()) => Ok(FenceStatus::Signaled),
        Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    // SAFETY: caller guarantees the handles are valid
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Resources owned by one frame-in-flight slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Command buffer re-recorded each time the slot comes around
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image is ready to be drawn to
    pub image_available: vk::Semaphore,
    /// Signaled when rendering is complete and the image may be presented
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission has finished on the GPU
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// Create the sync objects for a slot around an already allocated
    /// command buffer. The fence starts signaled so the first wait returns.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        // SAFETY: caller guarantees the device is valid
        unsafe {
            Ok(Self {
                command_buffer,
                image_available: create_semaphore(device)?,
                render_finished: create_semaphore(device)?,
                in_flight: create_fence(device, true)?,
            })
        }
    }

    /// Wait for this slot's previous submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<FenceStatus> {
        // SAFETY: caller guarantees the device is valid
        unsafe { wait_for_fence(device, self.in_flight, timeout_ns) }
    }

    /// Reset the fence before the slot is submitted again.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        // SAFETY: caller guarantees the device is valid
        unsafe { reset_fence(device, self.in_flight) }
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the slot is idle
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// All frame slots plus the pool their command buffers come from.
pub struct FrameSlots {
    pool: Option<CommandPool>,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Allocate `count` slots on the graphics queue family.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, graphics_family: u32, count: usize) -> Result<Self> {
        let count_u32 = u32::try_from(count)
            .map_err(|_| GpuError::InvalidState(format!("Too many frame slots: {count}")))?;

        // SAFETY: caller guarantees the device is valid
        unsafe {
            let pool = CommandPool::new(
                device,
                graphics_family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?;
            let buffers = pool.allocate_command_buffers(device, count_u32)?;

            let mut slots = Vec::with_capacity(count);
            for cmd in buffers {
                slots.push(FrameSlot::new(device, cmd)?);
            }

            Ok(Self {
                pool: Some(pool),
                slots,
            })
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resources of slot `index`.
    pub fn get(&self, index: usize) -> Result<&FrameSlot> {
        self.slots
            .get(index)
            .ok_or_else(|| GpuError::InvalidState(format!("Frame slot {index} out of range")))
    }

    /// Destroy all slots and their command pool. Calling it again does nothing.
    ///
    /// # Safety
    /// The device must be valid and no slot may be in flight.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: caller guarantees no slot is in flight
        unsafe {
            for slot in self.slots.drain(..) {
                slot.destroy(device);
            }
            if let Some(pool) = self.pool.take() {
                pool.destroy(device);
            }
        }
    }
}
