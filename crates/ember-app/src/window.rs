//! Window seam.

use std::sync::Arc;
use winit::window::Window;

/// What the frame loop needs from a window.
pub trait WindowSurface {
    /// Current framebuffer size in pixels; `(0, 0)` while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    fn should_close(&self) -> bool;

    /// Whether a resize happened since the last call. Clears the flag.
    fn take_resized(&mut self) -> bool;
}

/// [`WindowSurface`] over a winit window, fed by the event loop.
pub struct WinitWindow {
    window: Arc<Window>,
    resized: bool,
    close_requested: bool,
}

impl WinitWindow {
    pub const fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resized: false,
            close_requested: false,
        }
    }

    pub const fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Record a `Resized` event.
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    /// Record a `CloseRequested` event.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }
}

impl WindowSurface for WinitWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
