//! Test harness for Ember.
//!
//! Drives the real [`FrameScheduler`](ember_app::FrameScheduler) against
//! device-free mocks of the backend, window, scene and overlay, so the frame
//! loop and resize protocol can be checked without a GPU.

pub mod mock;
mod scenarios;

pub use mock::{
    mock_surface_support, BackendEvent, MockBackend, MockOverlay, MockRecorder, MockScene,
    MockWindow, RecordedCommand, MOCK_INDEX_COUNT, OVERLAY_INDEX_COUNT,
};

use std::time::Duration;

use ember_app::{FrameBackend, FrameOutcome, FrameScheduler};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] ember_gpu::GpuError),
    #[error("Frame slot {0} out of range")]
    SlotOutOfRange(usize),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Scheduler plus mocks, stepped one loop iteration at a time.
pub struct Harness {
    pub scheduler: FrameScheduler,
    pub backend: MockBackend,
    pub window: MockWindow,
    pub scene: MockScene,
    pub overlay: MockOverlay,
}

impl Harness {
    /// Two models in a window matching the backend's initial swapchain.
    pub fn new(backend: MockBackend) -> anyhow::Result<Self> {
        let extent = backend.swapchain_info().extent;
        let frames = backend.frames_in_flight();
        Ok(Self {
            scheduler: FrameScheduler::new(frames, Duration::from_secs(1))?,
            backend,
            window: MockWindow::new(extent.width, extent.height),
            scene: MockScene::new(2, extent.width, extent.height),
            overlay: MockOverlay::default(),
        })
    }

    /// Run one loop iteration.
    pub fn frame(&mut self) -> anyhow::Result<FrameOutcome> {
        self.scheduler.run_iteration(
            &mut self.backend,
            &mut self.window,
            &mut self.scene,
            &mut self.overlay,
        )
    }

    /// Run `count` iterations and collect their outcomes.
    pub fn frames(&mut self, count: usize) -> anyhow::Result<Vec<FrameOutcome>> {
        (0..count).map(|_| self.frame()).collect()
    }

    /// Stop the loop and release the mock's resources.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown(&mut self.backend)?;
        self.backend.destroy();
        Ok(())
    }
}
