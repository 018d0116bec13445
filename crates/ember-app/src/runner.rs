//! Application runner and event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::{EmberApp, FrameParts};
use crate::context::AppContext;
use crate::overlay::{NoOverlay, Overlay};
use crate::scheduler::{FrameOutcome, FrameScheduler, DEFAULT_FRAMES_IN_FLIGHT};
use crate::window::{WindowSurface, WinitWindow};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Force FIFO presentation.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frame slots recorded ahead of the GPU (1 to 3).
    pub frames_in_flight: usize,
    /// Upper bound on the fence wait and image acquisition per frame.
    pub frame_timeout: Duration,
    /// Compiled SPIR-V for the vertex stage.
    pub vertex_shader: PathBuf,
    /// Compiled SPIR-V for the fragment stage.
    pub fragment_shader: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 800,
            height: 600,
            target_fps: None,
            vsync: false,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            frame_timeout: Duration::from_secs(1),
            vertex_shader: PathBuf::from("shaders/simple.vert.spv"),
            fragment_shader: PathBuf::from("shaders/simple.frag.spv"),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight.
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the per-frame wait bound.
    #[must_use]
    pub const fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the SPIR-V files for the two shader stages.
    #[must_use]
    pub fn with_shaders(
        mut self,
        vertex: impl Into<PathBuf>,
        fragment: impl Into<PathBuf>,
    ) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    /// Frame duration implied by `target_fps`.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run an [`EmberApp`] with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the window is closed. Initialization and frame errors
/// are logged and returned.
pub fn run_app<A: EmberApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().map_err(|e| anyhow!("Failed to create event loop: {e}"))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop
        .run_app(&mut runner)
        .map_err(|e| anyhow!("Event loop error: {e}"))?;

    runner.failure.map_or(Ok(()), Err)
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: EmberApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
///
/// Field order is drop order: the app's scene goes before the context.
struct AppState<A: EmberApp> {
    app: A,
    ctx: AppContext,
    window: WinitWindow,
    scheduler: FrameScheduler,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
    minimized: bool,
    // FPS tracking
    frame_count: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: EmberApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(state) = &mut self.state {
                    state.window.request_close();
                }
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    tracing::debug!("Window resized to {}x{}", size.width, size.height);
                    state.window.notify_resized();
                    state.window.window().request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if state.window.should_close() {
                    return;
                }
                match state.render_frame(event_loop) {
                    Ok(()) => {
                        if !state.minimized {
                            state.window.window().request_redraw();
                        }
                    }
                    Err(e) => {
                        error!("Render error: {e:#}");
                        self.failure = Some(e);
                        self.shutdown(event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if !state.minimized {
                state.window.window().request_redraw();
            }
        }
    }
}

impl<A: EmberApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let scheduler =
            FrameScheduler::new(self.config.frames_in_flight, self.config.frame_timeout)?;
        let mut ctx = AppContext::new(Arc::clone(&window), &self.config)?;

        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            window: WinitWindow::new(window),
            scheduler,
            target_frame_time: self.config.target_frame_time(),
            last_frame_time: Instant::now(),
            minimized: false,
            frame_count: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: EmberApp> AppState<A> {
    fn render_frame(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = frame_start;

        self.app.update(&self.ctx, dt);

        let FrameParts { scene, overlay } = self.app.frame_parts();
        let mut no_overlay = NoOverlay;
        let overlay: &mut dyn Overlay = match overlay {
            Some(overlay) => overlay,
            None => &mut no_overlay,
        };

        let outcome = self
            .scheduler
            .run_iteration(&mut self.ctx, &mut self.window, scene, overlay)?;

        match outcome {
            FrameOutcome::ResizeDeferred => {
                if !self.minimized {
                    info!("Window minimized; waiting for a non-zero size");
                    self.minimized = true;
                    event_loop.set_control_flow(ControlFlow::Wait);
                }
                return Ok(());
            }
            FrameOutcome::Presented { .. } => {
                self.frame_count += 1;
                if dt > 0.0 {
                    let fps = 1.0 / f64::from(dt);
                    self.min_fps = self.min_fps.min(fps);
                    self.max_fps = self.max_fps.max(fps);
                    self.fps_sum += fps;
                }
            }
            FrameOutcome::Resized(_) | FrameOutcome::Skipped { .. } => {}
        }
        if self.minimized {
            info!("Window restored");
            self.minimized = false;
            event_loop.set_control_flow(ControlFlow::Poll);
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn cleanup(&mut self) {
        info!("Starting cleanup...");
        if let Err(e) = self.scheduler.shutdown(&mut self.ctx) {
            error!("Failed to stop frame loop: {e:#}");
        }

        if self.frame_count > 0 {
            let avg_fps = self.fps_sum / self.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.frame_count);
        }

        // Let the app cleanup first, then context resources
        self.app.cleanup(&mut self.ctx);
        self.ctx.cleanup();

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(config.frame_timeout, Duration::from_secs(1));
        assert!(!config.vsync);
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new("test")
            .with_size(400, 300)
            .with_vsync(true)
            .with_frames_in_flight(3)
            .with_shaders("a.spv", "b.spv");
        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (400, 300));
        assert!(config.vsync);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.vertex_shader, PathBuf::from("a.spv"));
        assert_eq!(config.fragment_shader, PathBuf::from("b.spv"));
    }

    #[test]
    fn target_frame_time_from_fps() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        let config = AppConfig::default().with_target_fps(0);
        assert_eq!(config.target_frame_time(), None);
    }
}
