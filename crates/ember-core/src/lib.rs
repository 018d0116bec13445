//! Core types, math, and traits for the Ember renderer.
//!
//! This crate provides the foundational types used throughout the renderer:
//! - Vertex layout and mesh data as they are uploaded to the GPU
//! - Model transforms (position, rotation, scale) and their animation
//! - Common error types

pub mod error;
pub mod math;
pub mod types;

pub use error::{Error, Result};
pub use math::Transform;
pub use types::{MeshData, Vertex};

/// Renderer-wide constants
pub mod constants {
    /// Default rotation rate applied by [`crate::Transform::rotate_y`], in degrees per second
    pub const DEFAULT_ROTATION_SPEED: f32 = 100.0;
}
