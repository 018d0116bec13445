//! Application framework for Ember.
//!
//! Owns the window, the Vulkan objects tied to it and the frame loop:
//! - frame-in-flight scheduling ([`FrameScheduler`])
//! - the acquire, submit and present protocol over a [`FrameBackend`]
//! - swapchain rebuilds on resize, deferred while minimized
//! - the winit event loop ([`run_app`])
//!
//! # Example
//!
//! ```no_run
//! use ember_app::{run_app, AppConfig, AppContext, EmberApp, FrameParts};
//! use ember_render::Scene;
//!
//! struct MyApp {
//!     scene: Scene,
//! }
//!
//! impl EmberApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         let scene = Scene::new(ctx.gpu(), ctx.pipeline(), 2, 1, ctx.extent())?;
//!         Ok(MyApp { scene })
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn frame_parts(&mut self) -> FrameParts<'_> {
//!         FrameParts::scene_only(&mut self.scene)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod backend;
mod context;
mod overlay;
mod runner;
mod scheduler;
mod window;

pub use app::{EmberApp, FrameParts};
pub use backend::{FrameBackend, RecordFn};
pub use context::AppContext;
pub use overlay::{NoOverlay, Overlay};
pub use runner::{run_app, AppConfig};
pub use scheduler::{
    FrameOutcome, FrameScheduler, FrameStats, SkipReason, SlotState, DEFAULT_FRAMES_IN_FLIGHT,
    MAX_FRAMES_IN_FLIGHT,
};
pub use window::{WindowSurface, WinitWindow};

// Re-export commonly used types for convenience
pub use ember_gpu::{GpuContext, GpuContextBuilder};
pub use ember_render::Camera;
pub use winit::event::WindowEvent;
