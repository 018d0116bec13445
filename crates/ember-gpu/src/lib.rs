//! Vulkan abstraction layer for the Ember renderer.
//!
//! This crate provides:
//! - Instance creation and physical device selection
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command pools and one-shot transfer submissions
//! - Swapchain, render pass and pipeline construction
//! - Per-frame synchronization primitives

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor, QueueFamilyIndices, SurfaceSupport};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    pool_sizes_for, write_combined_image_sampler, write_uniform_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::RenderPass;
pub use shader::{load_spirv, SpirV};
pub use surface::SurfaceContext;
pub use swapchain::{AcquireResult, PresentResult, Swapchain, SwapchainConfig, SwapchainInfo};
pub use sync::{FenceStatus, FrameSlot, FrameSlots};

/// Re-exported so dependents name Vulkan types through one version of ash.
pub use ash::vk;
