//! Math utilities and helpers.

use glam::{Mat3, Mat4, Vec3};

use crate::constants::DEFAULT_ROTATION_SPEED;

/// Placement of a model in world space.
///
/// Rotation is stored as Euler angles in degrees and applied X, then Y, then Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// World-space translation
    pub position: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
    /// Angular rate used by the `rotate_*` helpers, in degrees per second
    pub rotation_speed: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation_speed: DEFAULT_ROTATION_SPEED,
        }
    }
}

impl Transform {
    /// Create a transform at the given position
    #[inline]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Set the rotation rate in degrees per second
    #[inline]
    #[must_use]
    pub const fn with_rotation_speed(mut self, degrees_per_second: f32) -> Self {
        self.rotation_speed = degrees_per_second;
        self
    }

    /// Set a uniform scale
    #[inline]
    #[must_use]
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Advance the X rotation by `rotation_speed * dt`
    #[inline]
    pub fn rotate_x(&mut self, dt: f32) {
        self.rotation.x = wrap_degrees(self.rotation.x + self.rotation_speed * dt);
    }

    /// Advance the Y rotation by `rotation_speed * dt`
    #[inline]
    pub fn rotate_y(&mut self, dt: f32) {
        self.rotation.y = wrap_degrees(self.rotation.y + self.rotation_speed * dt);
    }

    /// Advance the Z rotation by `rotation_speed * dt`
    #[inline]
    pub fn rotate_z(&mut self, dt: f32) {
        self.rotation.z = wrap_degrees(self.rotation.z + self.rotation_speed * dt);
    }

    /// Model-to-world matrix: translate * rotate(X, Y, Z) * scale.
    pub fn world_matrix(&self) -> Mat4 {
        let rotation = Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians());

        Mat4::from_translation(self.position) * rotation * Mat4::from_scale(self.scale)
    }

    /// Matrix for transforming normals (inverse transpose of the upper 3x3).
    pub fn normal_matrix(&self) -> Mat4 {
        let upper = Mat3::from_mat4(self.world_matrix());
        Mat4::from_mat3(upper.inverse().transpose())
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
#[inline]
pub fn wrap_degrees(degrees: f32) -> f32 {
    degrees.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_world_matrix_is_identity() {
        let t = Transform::default();
        assert_eq!(t.world_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn rotation_advances_by_rate_times_dt() {
        let mut t = Transform::default();
        t.rotate_y(0.5);
        assert_relative_eq!(t.rotation.y, 50.0);
        t.rotate_y(0.1);
        assert_relative_eq!(t.rotation.y, 60.0, epsilon = 1e-4);
        assert_relative_eq!(t.rotation.x, 0.0);
    }

    #[test]
    fn rotation_wraps_past_full_turn() {
        let mut t = Transform::default().with_rotation_speed(90.0);
        t.rotate_z(5.0);
        assert_relative_eq!(t.rotation.z, 90.0, epsilon = 1e-4);
    }

    #[test]
    fn translation_lands_in_last_column() {
        let t = Transform::from_position(Vec3::new(-1.0, -2.0, -3.0));
        let origin = t.world_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(origin.x, -1.0);
        assert_relative_eq!(origin.y, -2.0);
        assert_relative_eq!(origin.z, -3.0);
    }

    #[test]
    fn scale_then_rotate_then_translate() {
        let mut t = Transform::from_position(Vec3::X).with_uniform_scale(2.0);
        t.rotation.y = 90.0;
        // +X scaled to 2, rotated 90 degrees about Y to -Z, then moved by +X
        let p = t.world_matrix().transform_point3(Vec3::X);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, -2.0, epsilon = 1e-5);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let mut t = Transform::default();
        t.scale = Vec3::new(2.0, 1.0, 1.0);
        let n = t.normal_matrix().transform_vector3(Vec3::X);
        assert_relative_eq!(n.x, 0.5, epsilon = 1e-5);
    }
}
