//! Viewer application: two spinning cubes under one point light.

use std::path::Path;

use glam::Vec3;
use tracing::{error, info};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use ember_app::{AppContext, EmberApp, FrameBackend, FrameParts, Overlay};
use ember_core::Transform;
use ember_render::{Scene, SceneParams, Texture};

use crate::cube::cube;

/// Optional texture for the first cube, relative to the working directory.
const CUBE_TEXTURE: &str = "assets/cube.png";

/// Light movement per key press, in world units.
const LIGHT_STEP: f32 = 0.5;

/// Shininess change per key press.
const SHININESS_STEP: f32 = 4.0;

/// Keyboard-driven scene tuning: arrow keys move the light in X/Z,
/// PageUp/PageDown in Y, `[`/`]` change shininess.
#[derive(Debug, Default)]
pub struct LightControls {
    light_delta: Vec3,
    shininess_delta: f32,
}

impl LightControls {
    /// Queue the change bound to `key`. Returns whether the key is bound.
    fn press(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::ArrowLeft => self.light_delta.x -= LIGHT_STEP,
            KeyCode::ArrowRight => self.light_delta.x += LIGHT_STEP,
            KeyCode::ArrowUp => self.light_delta.z -= LIGHT_STEP,
            KeyCode::ArrowDown => self.light_delta.z += LIGHT_STEP,
            KeyCode::PageUp => self.light_delta.y += LIGHT_STEP,
            KeyCode::PageDown => self.light_delta.y -= LIGHT_STEP,
            KeyCode::BracketRight => self.shininess_delta += SHININESS_STEP,
            KeyCode::BracketLeft => self.shininess_delta -= SHININESS_STEP,
            _ => return false,
        }
        true
    }
}

impl Overlay for LightControls {
    fn tune(&mut self, params: &mut SceneParams) {
        if self.light_delta == Vec3::ZERO && self.shininess_delta == 0.0 {
            return;
        }
        params.light_position += std::mem::take(&mut self.light_delta);
        let shininess = params.material.shininess + std::mem::take(&mut self.shininess_delta);
        params.material.shininess = shininess.max(1.0);
        info!(
            "Light at {:?}, shininess {:.0}",
            params.light_position, params.material.shininess
        );
    }
}

/// Viewer application state.
pub struct Viewer {
    scene: Scene,
    controls: LightControls,
}

impl EmberApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let mut scene = Scene::new(
            ctx.gpu(),
            ctx.pipeline(),
            ctx.frames_in_flight(),
            2,
            ctx.extent(),
        )?;

        let mesh = cube(1.0)?;
        if Path::new(CUBE_TEXTURE).exists() {
            let texture = Texture::load(&ctx.gpu, CUBE_TEXTURE)?;
            scene.add_textured_model("cube", &mesh, Transform::default(), texture)?;
        } else {
            scene.add_model("cube", &mesh, Transform::default())?;
        }
        scene.add_model(
            "cube (offset)",
            &mesh,
            Transform::from_position(Vec3::new(-1.0, -2.0, -3.0)),
        )?;

        info!(
            "Scene ready: {} models, {} indices each",
            scene.models().len(),
            mesh.index_count()
        );
        info!("Arrow keys and PageUp/PageDown move the light, [ and ] change shininess");

        Ok(Self {
            scene,
            controls: LightControls::default(),
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        for model in self.scene.models_mut() {
            model.transform.rotate_y(dt);
        }
    }

    fn frame_parts(&mut self) -> FrameParts<'_> {
        FrameParts {
            scene: &mut self.scene,
            overlay: Some(&mut self.controls),
        }
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.controls.press(*key),
            _ => false,
        }
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        // SAFETY: the framework waits for device idle before cleanup
        if let Err(e) = unsafe { self.scene.destroy() } {
            error!("Failed to destroy scene: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn controls_accumulate_until_tuned() {
        let mut controls = LightControls::default();
        assert!(controls.press(KeyCode::ArrowRight));
        assert!(controls.press(KeyCode::ArrowRight));
        assert!(controls.press(KeyCode::PageUp));
        assert!(!controls.press(KeyCode::KeyQ));

        let mut params = SceneParams::default();
        let start = params.light_position;
        controls.tune(&mut params);
        assert_relative_eq!(params.light_position.x, start.x + 1.0);
        assert_relative_eq!(params.light_position.y, start.y + 0.5);

        controls.tune(&mut params);
        assert_relative_eq!(params.light_position.x, start.x + 1.0);
    }

    #[test]
    fn shininess_stays_positive() {
        let mut controls = LightControls::default();
        for _ in 0..20 {
            controls.press(KeyCode::BracketLeft);
        }
        let mut params = SceneParams::default();
        controls.tune(&mut params);
        assert_relative_eq!(params.material.shininess, 1.0);
    }
}
