//! Frame-in-flight scheduling and the swapchain resize protocol.
//!
//! Each call to [`FrameScheduler::run_iteration`] either renders one frame
//! through the current slot, skips it on a recoverable condition, or runs
//! the resize protocol. The slot index only advances when a submission
//! happened.

use crate::backend::FrameBackend;
use crate::overlay::Overlay;
use crate::window::WindowSurface;
use anyhow::{bail, ensure};
use ash::vk;
use ember_gpu::{AcquireResult, FenceStatus, PresentResult};
use ember_render::{record_scene, CommandRecorder, FrameTarget, RenderScene};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Allowed range for the number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Lifecycle of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence known signaled; resources free to reuse.
    Idle,
    /// Waiting on an image from the swapchain.
    Acquiring,
    /// Uniforms written, command buffer being recorded.
    Recording,
    /// Submitted; resources in use until the fence is waited on.
    Submitted,
}

impl SlotState {
    /// Whether `self -> next` is a legal step.
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquiring)
                | (Self::Acquiring, Self::Recording | Self::Idle)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Idle)
        )
    }
}

/// Why a frame was not rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FenceTimeout,
    AcquireTimeout,
    AcquireOutOfDate,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and handed to the presentation engine.
    Presented {
        slot: usize,
        image_index: u32,
        present: PresentResult,
    },
    /// Nothing was submitted; the slot index did not advance.
    Skipped { slot: usize, reason: SkipReason },
    /// The swapchain was rebuilt; no frame was rendered.
    Resized(vk::Extent2D),
    /// A resize is pending but the framebuffer has zero area.
    ResizeDeferred,
}

/// Running totals, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub swapchain_rebuilds: u64,
    pub resizes_deferred: u64,
}

/// Drives N frame slots through wait → acquire → record → submit → present.
pub struct FrameScheduler {
    slots: Vec<SlotState>,
    current: usize,
    resize_pending: bool,
    timeout_ns: u64,
    stats: FrameStats,
}

impl FrameScheduler {
    /// Create a scheduler for `frames_in_flight` slots (1 to 3).
    ///
    /// `frame_timeout` bounds the fence wait and image acquisition.
    pub fn new(frames_in_flight: usize, frame_timeout: Duration) -> anyhow::Result<Self> {
        ensure!(
            (1..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight),
            "frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {frames_in_flight}"
        );
        let timeout_ns = u64::try_from(frame_timeout.as_nanos()).unwrap_or(u64::MAX);
        Ok(Self {
            slots: vec![SlotState::Idle; frames_in_flight],
            current: 0,
            resize_pending: false,
            timeout_ns,
            stats: FrameStats::default(),
        })
    }

    pub const fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    pub const fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Ask for a swapchain rebuild before the next frame.
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    fn transition(&mut self, slot: usize, next: SlotState) -> anyhow::Result<()> {
        let Some(state) = self.slots.get_mut(slot) else {
            bail!("frame slot {slot} out of range");
        };
        ensure!(
            state.can_become(next),
            "frame slot {slot} cannot go from {state:?} to {next:?}"
        );
        trace!("Slot {} {:?} -> {:?}", slot, *state, next);
        *state = next;
        Ok(())
    }

    /// Run one iteration of the frame loop.
    pub fn run_iteration(
        &mut self,
        backend: &mut dyn FrameBackend,
        window: &mut dyn WindowSurface,
        scene: &mut dyn RenderScene,
        overlay: &mut dyn Overlay,
    ) -> anyhow::Result<FrameOutcome> {
        ensure!(
            backend.frames_in_flight() == self.slots.len(),
            "backend has {} frame slots, scheduler has {}",
            backend.frames_in_flight(),
            self.slots.len()
        );

        if window.take_resized() {
            self.resize_pending = true;
        }
        if self.resize_pending {
            return self.resize(backend, window, scene);
        }

        let slot = self.current;
        let Some(frame_set) = scene.frame_descriptor_set(slot) else {
            bail!("scene has no frame descriptor set for slot {slot}");
        };

        // 1. Always wait on the slot fence; an unused slot's fence starts signaled
        match backend.wait_for_slot(slot, self.timeout_ns)? {
            FenceStatus::Signaled => {
                if self.slots[slot] == SlotState::Submitted {
                    self.transition(slot, SlotState::Idle)?;
                }
            }
            FenceStatus::TimedOut => {
                warn!("Frame slot {} fence wait timed out; skipping frame", slot);
                self.resize_pending = true;
                return Ok(self.skip(slot, SkipReason::FenceTimeout));
            }
        }

        // 2. Acquire
        self.transition(slot, SlotState::Acquiring)?;
        let image_index = match backend.acquire_image(slot, self.timeout_ns)? {
            AcquireResult::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("Acquired suboptimal image {}", image_index);
                }
                image_index
            }
            AcquireResult::OutOfDate => {
                debug!("Swapchain out of date at acquire");
                self.transition(slot, SlotState::Idle)?;
                self.resize_pending = true;
                return Ok(self.skip(slot, SkipReason::AcquireOutOfDate));
            }
            AcquireResult::TimedOut => {
                warn!("Image acquisition timed out; skipping frame");
                self.transition(slot, SlotState::Idle)?;
                self.resize_pending = true;
                return Ok(self.skip(slot, SkipReason::AcquireTimeout));
            }
        };

        // 3. Only reset once a submission is certain to follow
        backend.reset_slot(slot)?;

        // 4. Uniforms for this slot, then record
        self.transition(slot, SlotState::Recording)?;
        overlay.tune(scene.params_mut());
        scene.prepare_frame(slot)?;
        {
            let scene: &dyn RenderScene = scene;
            let mut record = |rec: &mut dyn CommandRecorder, target: &FrameTarget| {
                record_scene(rec, target, scene, slot, frame_set, |rec| overlay.record(rec));
            };
            backend.record(slot, image_index, &mut record)?;
        }

        // 5. Submit
        backend.submit(slot)?;
        self.transition(slot, SlotState::Submitted)?;

        // 6. Present
        let present = backend.present(slot, image_index)?;
        if present.needs_rebuild() {
            debug!("Present reported {:?}; rebuilding before next frame", present);
            self.resize_pending = true;
        }

        // 7. Advance
        self.current = (self.current + 1) % self.slots.len();
        self.stats.frames_presented += 1;

        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            present,
        })
    }

    fn skip(&mut self, slot: usize, reason: SkipReason) -> FrameOutcome {
        self.stats.frames_skipped += 1;
        FrameOutcome::Skipped { slot, reason }
    }

    fn resize(
        &mut self,
        backend: &mut dyn FrameBackend,
        window: &dyn WindowSurface,
        scene: &mut dyn RenderScene,
    ) -> anyhow::Result<FrameOutcome> {
        let (width, height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            debug!("Framebuffer is {}x{}; deferring resize", width, height);
            self.stats.resizes_deferred += 1;
            return Ok(FrameOutcome::ResizeDeferred);
        }

        backend.wait_idle()?;
        self.settle_slots();

        let info = backend.rebuild_swapchain(width, height)?;
        scene.resize(info.extent);
        self.resize_pending = false;
        self.stats.swapchain_rebuilds += 1;

        info!(
            "Swapchain rebuilt: {}x{}, {:?}, {} images",
            info.extent.width, info.extent.height, info.present_mode, info.image_count
        );
        Ok(FrameOutcome::Resized(info.extent))
    }

    /// After a device-idle wait every submission has finished.
    fn settle_slots(&mut self) {
        for state in &mut self.slots {
            *state = SlotState::Idle;
        }
    }

    /// Wait for all outstanding work and return every slot to idle.
    pub fn shutdown(&mut self, backend: &mut dyn FrameBackend) -> anyhow::Result<()> {
        backend.wait_idle()?;
        self.settle_slots();
        let stats = self.stats;
        info!(
            "Frame loop stopped: {} presented, {} skipped, {} swapchain rebuilds, \
             {} deferred resizes",
            stats.frames_presented,
            stats.frames_skipped,
            stats.swapchain_rebuilds,
            stats.resizes_deferred
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycle_is_legal() {
        use SlotState::{Acquiring, Idle, Recording, Submitted};
        assert!(Idle.can_become(Acquiring));
        assert!(Acquiring.can_become(Recording));
        assert!(Recording.can_become(Submitted));
        assert!(Submitted.can_become(Idle));
    }

    #[test]
    fn submitted_slot_cannot_be_recorded() {
        use SlotState::{Acquiring, Idle, Recording, Submitted};
        assert!(!Submitted.can_become(Acquiring));
        assert!(!Submitted.can_become(Recording));
        assert!(!Idle.can_become(Recording));
        assert!(!Recording.can_become(Idle));
    }

    #[test]
    fn abandoned_acquire_returns_to_idle() {
        assert!(SlotState::Acquiring.can_become(SlotState::Idle));
    }

    #[test]
    fn frames_in_flight_bounds() {
        let timeout = Duration::from_secs(1);
        assert!(FrameScheduler::new(0, timeout).is_err());
        assert!(FrameScheduler::new(4, timeout).is_err());
        for n in 1..=MAX_FRAMES_IN_FLIGHT {
            let scheduler = FrameScheduler::new(n, timeout).unwrap();
            assert_eq!(scheduler.current_slot(), 0);
            assert_eq!(scheduler.slot_state(n - 1), Some(SlotState::Idle));
            assert_eq!(scheduler.slot_state(n), None);
        }
    }

    #[test]
    fn huge_timeout_saturates() {
        let scheduler = FrameScheduler::new(2, Duration::MAX).unwrap();
        assert_eq!(scheduler.timeout_ns, u64::MAX);
    }
}
