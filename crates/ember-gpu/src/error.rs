//! GPU error types.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// GPU-related errors.
///
/// Recoverable frame conditions (out-of-date, suboptimal, timeouts) are not
/// represented here; see [`crate::swapchain::AcquireResult`],
/// [`crate::swapchain::PresentResult`] and [`crate::sync::FenceStatus`].
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// The selected GPU lacks a queue family with the required capability.
    #[error("No queue family supports {0}")]
    MissingQueueFamily(&'static str),

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// No memory type satisfies the filter and property flags.
    #[error("No memory type matches filter {type_filter:#b} with properties {properties:?}")]
    NoMatchingMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader binary could not be read.
    #[error("Failed to load shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline or render pass creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Requested image layout transition has no barrier recipe.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// None of the candidate depth formats can be used as a depth attachment.
    #[error("No supported depth format among {0:?}")]
    UnsupportedDepthFormat(Vec<vk::Format>),

    /// Texture decoding failed.
    #[error("Texture load failed: {0}")]
    TextureLoad(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
