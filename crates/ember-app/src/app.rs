//! `EmberApp` trait definition.

use crate::context::AppContext;
use crate::overlay::Overlay;
use ember_render::RenderScene;
use winit::event::WindowEvent;

/// What the frame loop draws this frame.
pub struct FrameParts<'a> {
    pub scene: &'a mut dyn RenderScene,
    pub overlay: Option<&'a mut dyn Overlay>,
}

impl<'a> FrameParts<'a> {
    /// A scene with nothing drawn over it.
    pub fn scene_only(scene: &'a mut dyn RenderScene) -> Self {
        Self {
            scene,
            overlay: None,
        }
    }
}

/// Trait for Ember applications.
///
/// The framework owns the window, device, swapchain and frame loop; an app
/// owns its scene and decides what changes between frames.
pub trait EmberApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, device, swapchain and scene pipeline
    /// exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the time since the previous
    /// frame in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// The scene to draw, and optionally an overlay on top of it.
    fn frame_parts(&mut self) -> FrameParts<'_>;

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release GPU resources before shutdown.
    ///
    /// The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
