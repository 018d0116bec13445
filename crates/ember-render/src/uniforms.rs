//! GPU-visible uniform blocks.
//!
//! Both blocks are laid out for std140: matrices first, then `vec4`s, so no
//! implicit padding is needed.

use crate::camera::Camera;
use crate::params::SceneParams;
use ember_core::Transform;

/// Set 0, binding 0: per-frame camera and light data.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub light_position: [f32; 4],
    pub light_color: [f32; 4],
}

impl FrameUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(camera: &Camera, params: &SceneParams) -> Self {
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            light_position: params.light_position.extend(1.0).to_array(),
            light_color: params.light_color.extend(1.0).to_array(),
        }
    }
}

/// Set 1, binding 0: per-model transform and material.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    pub world: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    /// `(ambient, diffuse, specular, shininess)`
    pub material: [f32; 4],
}

impl ModelUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(transform: &Transform, params: &SceneParams) -> Self {
        Self {
            world: transform.world_matrix().to_cols_array_2d(),
            normal: transform.normal_matrix().to_cols_array_2d(),
            material: params.material.to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn sizes_are_std140_multiples() {
        assert_eq!(FrameUniforms::SIZE, 176);
        assert_eq!(ModelUniforms::SIZE, 144);
        assert_eq!(FrameUniforms::SIZE % 16, 0);
        assert_eq!(ModelUniforms::SIZE % 16, 0);
    }

    #[test]
    fn model_uniforms_carry_translation() {
        let transform = Transform::from_position(Vec3::new(-1.0, -2.0, -3.0));
        let uniforms = ModelUniforms::new(&transform, &SceneParams::default());
        assert_relative_eq!(uniforms.world[3][0], -1.0);
        assert_relative_eq!(uniforms.world[3][1], -2.0);
        assert_relative_eq!(uniforms.world[3][2], -3.0);
        assert_relative_eq!(uniforms.material[3], 32.0);
    }

    #[test]
    fn frame_uniforms_use_scene_light() {
        let params = SceneParams {
            light_color: Vec3::new(1.0, 0.5, 0.25),
            ..SceneParams::default()
        };
        let uniforms = FrameUniforms::new(&Camera::default(), &params);
        assert_eq!(uniforms.light_color, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(uniforms.camera_position, [0.0, 0.0, 5.0, 1.0]);
    }
}
