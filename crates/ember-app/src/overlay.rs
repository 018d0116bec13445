//! Overlay hook.

use ember_render::{CommandRecorder, SceneParams};

/// Something drawn on top of the scene, inside the scene's render pass.
///
/// Both methods run once per rendered frame: `tune` after the app update and
/// before uniforms are written, `record` after the last model draw.
pub trait Overlay {
    /// Edit scene parameters in place.
    #[allow(unused_variables)]
    fn tune(&mut self, params: &mut SceneParams) {}

    /// Append draw commands to the open render pass.
    #[allow(unused_variables)]
    fn record(&mut self, rec: &mut dyn CommandRecorder) {}
}

/// Draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl Overlay for NoOverlay {}
