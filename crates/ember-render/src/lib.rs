//! Scene rendering for the Ember renderer.
//!
//! This crate provides:
//! - Camera and view management
//! - The lit, textured mesh pipeline and its render pass
//! - Models, textures and the scene that owns them
//! - The command recording seam used by the frame loop

pub mod camera;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod recorder;
pub mod scene;
pub mod texture;
pub mod uniforms;

pub use camera::Camera;
pub use model::Model;
pub use params::{Material, SceneParams};
pub use pipeline::{ScenePipeline, ShaderPair};
pub use recorder::{
    record_scene, CommandRecorder, DrawItem, FrameTarget, RenderScene, VkCommandRecorder,
};
pub use scene::Scene;
pub use texture::Texture;
pub use uniforms::{FrameUniforms, ModelUniforms};
