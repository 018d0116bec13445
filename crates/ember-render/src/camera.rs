//! Camera and view management.

use glam::{Mat4, Vec3};

/// Perspective camera looking at a fixed target.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 70f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Create a camera with the default lens for a viewport of the given size.
    pub fn for_viewport(width: u32, height: u32) -> Self {
        let mut camera = Self::default();
        camera.set_viewport(width, height);
        camera
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Update the aspect ratio from a viewport size. Zero-area viewports are
    /// ignored so a minimized window keeps the last valid projection.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            #[allow(clippy::cast_precision_loss)]
            let aspect = width as f32 / height as f32;
            self.aspect = aspect;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed perspective with a `[0, 1]` depth range. Y is flipped
    /// because Vulkan clip space points down.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn target_projects_to_screen_center() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn up_points_toward_negative_clip_y() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn viewport_sets_aspect() {
        let mut camera = Camera::for_viewport(800, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);

        camera.set_viewport(400, 400);
        assert_relative_eq!(camera.aspect, 1.0);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = Camera::for_viewport(800, 600);
        camera.set_viewport(0, 0);
        camera.set_viewport(640, 0);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
    }
}
