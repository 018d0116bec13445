//! Command buffer management.

use crate::error::Result;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        // SAFETY: caller guarantees the device is valid
        let pool = unsafe { device.create_command_pool(&create_info, None)? };

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: caller guarantees the device is valid
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Destroy the command pool, freeing every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pool is idle
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    // SAFETY: caller guarantees the handles are valid
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    // SAFETY: caller guarantees the handles are valid
    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    // SAFETY: caller guarantees the handles are valid
    unsafe { device.queue_submit(queue, &[submit_info], fence)? };
    Ok(())
}

/// Pool and queue used for blocking one-shot uploads.
///
/// Owned by [`crate::GpuContext`]; created before the first resource upload
/// and destroyed after the last one.
pub struct TransferContext {
    pool: CommandPool,
    queue: vk::Queue,
}

impl TransferContext {
    /// Create a transfer context on `queue`, which must belong to `queue_family`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, queue_family: u32, queue: vk::Queue) -> Result<Self> {
        // SAFETY: caller guarantees the device is valid
        let pool = unsafe {
            CommandPool::new(device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?
        };
        Ok(Self { pool, queue })
    }

    /// The queue uploads are submitted to.
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Record `f` into a fresh command buffer, submit it, and block until the
    /// queue is idle. Nothing is submitted if `f` fails.
    ///
    /// # Safety
    /// The device must be valid and everything `f` records must stay alive
    /// until this returns.
    pub unsafe fn execute<F>(&self, device: &ash::Device, f: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        // SAFETY: caller guarantees the device is valid
        unsafe {
            let cmd = self.pool.allocate_command_buffers(device, 1)?[0];

            let result = (|| -> Result<()> {
                begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
                f(cmd)?;
                end_command_buffer(device, cmd)?;

                let cmd_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
                device.queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
                device.queue_wait_idle(self.queue)?;
                Ok(())
            })();

            device.free_command_buffers(self.pool.handle(), &[cmd]);
            result
        }
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// No upload may be in progress.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pool is idle
        unsafe { self.pool.destroy(device) };
    }
}
