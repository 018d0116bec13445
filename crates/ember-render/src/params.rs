//! Tunable scene parameters.

use glam::Vec3;

/// Phong material coefficients shared by every model in the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: 0.1,
            diffuse: 0.8,
            specular: 0.5,
            shininess: 32.0,
        }
    }
}

impl Material {
    /// Packed as `vec4(ambient, diffuse, specular, shininess)`.
    pub const fn to_array(self) -> [f32; 4] {
        [self.ambient, self.diffuse, self.specular, self.shininess]
    }
}

/// State an overlay may edit between the update and render steps.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneParams {
    pub camera_position: Vec3,
    pub light_position: Vec3,
    pub light_color: Vec3,
    pub material: Material,
    pub clear_color: [f32; 4],
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            camera_position: Vec3::new(0.0, 0.0, 5.0),
            light_position: Vec3::new(2.0, 4.0, 3.0),
            light_color: Vec3::ONE,
            material: Material::default(),
            clear_color: [0.02, 0.02, 0.03, 1.0],
        }
    }
}
