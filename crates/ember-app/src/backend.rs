//! The device-facing half of the frame loop.

use ember_gpu::{AcquireResult, FenceStatus, PresentResult, SwapchainInfo};
use ember_render::{CommandRecorder, FrameTarget};

/// Callback that records one frame's commands.
pub type RecordFn<'a> = dyn FnMut(&mut dyn CommandRecorder, &FrameTarget) + 'a;

/// Operations the [`FrameScheduler`](crate::FrameScheduler) drives each frame.
///
/// Slots are indices in `0..frames_in_flight()`. Recoverable conditions come
/// back as values; `Err` is fatal.
pub trait FrameBackend {
    /// Number of frame slots.
    fn frames_in_flight(&self) -> usize;

    /// The live swapchain.
    fn swapchain_info(&self) -> SwapchainInfo;

    /// Wait for the slot's previous submission to finish.
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> anyhow::Result<FenceStatus>;

    /// Acquire the next image, signaling the slot's image-acquired semaphore.
    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> anyhow::Result<AcquireResult>;

    /// Unsignal the slot's fence so the next submission can signal it.
    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()>;

    /// Reset and record the slot's command buffer for `image_index`.
    fn record(
        &mut self,
        slot: usize,
        image_index: u32,
        record: &mut RecordFn<'_>,
    ) -> anyhow::Result<()>;

    /// Submit the slot's command buffer: wait image-acquired, signal
    /// render-finished and the slot fence.
    fn submit(&mut self, slot: usize) -> anyhow::Result<()>;

    /// Present `image_index` once the slot's render-finished semaphore fires.
    fn present(&mut self, slot: usize, image_index: u32) -> anyhow::Result<PresentResult>;

    /// Block until the device has no pending work.
    fn wait_idle(&mut self) -> anyhow::Result<()>;

    /// Replace the swapchain for a `width` x `height` framebuffer, rebuilding
    /// whatever depends on it. Only called after [`Self::wait_idle`].
    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<SwapchainInfo>;
}
