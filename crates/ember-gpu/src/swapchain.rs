//! Swapchain management.
//!
//! Choosing swapchain parameters is split from creating the swapchain: the
//! `select_*`/[`SwapchainConfig::choose`] functions are pure and operate on a
//! [`SurfaceSupport`] snapshot, while [`Swapchain`] owns the Vulkan objects
//! (images, views, depth buffer, framebuffers) built from a chosen config.

use crate::capabilities::SurfaceSupport;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::image::{create_image_view, has_stencil_component};
use crate::memory::GpuImage;
use ash::vk;

/// Select the surface format: `B8G8R8A8_SRGB` with sRGB-nonlinear color space
/// if offered, otherwise the first reported format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the present mode: mailbox when offered, otherwise FIFO.
///
/// FIFO is the only mode every surface supports. `vsync` forces FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
///
/// The surface's current extent wins unless it is the `u32::MAX` sentinel, in
/// which case the framebuffer size is clamped into the surface bounds.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// `min + 1`, capped at `max` unless `max` is 0 (unbounded).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Swapchain parameters chosen for one surface state and window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    /// Choose format, present mode, extent and image count for `support`.
    pub fn choose(support: &SurfaceSupport, width: u32, height: u32, vsync: bool) -> Result<Self> {
        let surface_format = select_surface_format(&support.formats)
            .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))?;

        Ok(Self {
            surface_format,
            present_mode: select_present_mode(&support.present_modes, vsync),
            extent: calculate_extent(&support.capabilities, width, height),
            image_count: select_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }

    /// Summary of the chosen parameters.
    pub const fn info(&self) -> SwapchainInfo {
        SwapchainInfo {
            format: self.surface_format.format,
            present_mode: self.present_mode,
            extent: self.extent,
            image_count: self.image_count,
        }
    }
}

/// What the rest of the renderer needs to know about the live swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// Result of acquiring the next swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image was acquired; `suboptimal` images may still be rendered to.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
    /// No image became available within the timeout.
    TimedOut,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentResult {
    /// Whether the swapchain should be rebuilt before the next frame.
    pub const fn needs_rebuild(self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

/// Depth attachment sized to the swapchain.
pub struct DepthBuffer {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// Swapchain wrapper: images, views, depth buffer and per-image framebuffers.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub depth: DepthBuffer,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Create a swapchain, its image views and a matching depth buffer.
    ///
    /// Framebuffers are created separately by [`Self::create_framebuffers`]
    /// once a compatible render pass exists. `old_swapchain` may be null.
    ///
    /// # Safety
    /// All handles must be valid and `old_swapchain` must not be in use.
    pub unsafe fn new(
        gpu: &GpuContext,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        config: &SwapchainConfig,
        depth_format: vk::Format,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let device = gpu.device();
        let (sharing_mode, queue_families) = gpu.queue_families().sharing();

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        // SAFETY: caller guarantees all handles are valid
        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };

        // SAFETY: swapchain was just created
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };

        let image_views = images
            .iter()
            .map(|&image| {
                // SAFETY: images belong to the live swapchain
                unsafe {
                    create_image_view(
                        device,
                        image,
                        config.surface_format.format,
                        vk::ImageAspectFlags::COLOR,
                    )
                }
            })
            .collect::<Result<Vec<_>>>()?;

        // SAFETY: device is valid
        let depth = unsafe { create_depth_buffer(gpu, config.extent, depth_format)? };

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: config.surface_format.format,
            present_mode: config.present_mode,
            extent: config.extent,
            depth,
            framebuffers: Vec::new(),
        })
    }

    /// Summary of the live swapchain.
    pub fn info(&self) -> SwapchainInfo {
        SwapchainInfo {
            format: self.format,
            present_mode: self.present_mode,
            extent: self.extent,
            image_count: u32::try_from(self.images.len()).unwrap_or(u32::MAX),
        }
    }

    /// Create one framebuffer per image (color view + shared depth view).
    ///
    /// # Safety
    /// `render_pass` must be compatible with the swapchain and depth formats.
    pub unsafe fn create_framebuffers(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        // SAFETY: caller guarantees compatibility; old framebuffers are unused
        unsafe { self.destroy_framebuffers(device) };

        for &view in &self.image_views {
            let attachments = [view, self.depth.view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            // SAFETY: caller guarantees the render pass is valid
            let framebuffer = unsafe { device.create_framebuffer(&info, None)? };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Framebuffer for the acquired image.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!("No framebuffer for swapchain image {image_index}"))
            })
    }

    unsafe fn destroy_framebuffers(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            // SAFETY: caller guarantees no frame references the framebuffer
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireResult> {
        // SAFETY: caller guarantees the handles are valid
        let result = unsafe {
            swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireResult::TimedOut),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image once `wait_semaphores` are signaled.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentResult> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: caller guarantees the handles are valid
        let result = unsafe { swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy framebuffers, depth buffer, views and the swapchain.
    ///
    /// Safe to call more than once.
    ///
    /// # Safety
    /// The swapchain must not be in use by any in-flight frame.
    pub unsafe fn destroy(
        &mut self,
        gpu: &GpuContext,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) -> Result<()> {
        let device = gpu.device();
        // SAFETY: caller guarantees nothing references these objects
        unsafe {
            self.destroy_framebuffers(device);

            if self.depth.view != vk::ImageView::null() {
                device.destroy_image_view(self.depth.view, None);
                self.depth.view = vk::ImageView::null();
            }
            gpu.allocator().lock().free_image(&mut self.depth.image)?;

            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.images.clear();

            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        Ok(())
    }
}

/// Create a device-local depth image and view of the given size.
unsafe fn create_depth_buffer(
    gpu: &GpuContext,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<DepthBuffer> {
    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = gpu.allocator().lock().create_image(
        &create_info,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        "depth buffer",
    )?;

    let mut aspect = vk::ImageAspectFlags::DEPTH;
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    // SAFETY: image was just created on this device
    let view = unsafe { create_image_view(gpu.device(), image.image, format, aspect)? };

    Ok(DepthBuffer {
        image,
        view,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    fn support(present_modes: Vec<vk::PresentModeKHR>) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: caps(2, 3, UNDEFINED_EXTENT),
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes,
        }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let chosen = select_surface_format(&support(vec![]).formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert_eq!(select_surface_format(&formats), Some(formats[0]));
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
        // Immediate alone is never picked over FIFO
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn defined_current_extent_wins() {
        let current = vk::Extent2D {
            width: 640,
            height: 480,
        };
        assert_eq!(calculate_extent(&caps(2, 3, current), 800, 600), current);
    }

    #[test]
    fn extent_and_image_count_stay_in_bounds() {
        let sizes = [1u32, 2, 17, 300, 400, 599, 600, 800, 1920, 4096, 5000, 100_000];
        let bounds = [(1, 0), (2, 3), (2, 2), (3, 8), (1, 1)];
        for &(min, max) in &bounds {
            let c = caps(min, max, UNDEFINED_EXTENT);
            for &w in &sizes {
                for &h in &sizes {
                    let extent = calculate_extent(&c, w, h);
                    assert!((1..=4096).contains(&extent.width), "{w}x{h}");
                    assert!((1..=4096).contains(&extent.height), "{w}x{h}");

                    let count = select_image_count(&c);
                    assert!(count >= min);
                    if max > 0 {
                        assert!(count <= max);
                    }
                }
            }
        }
    }

    #[test]
    fn image_count_is_min_plus_one_when_unbounded() {
        assert_eq!(select_image_count(&caps(2, 0, UNDEFINED_EXTENT)), 3);
        assert_eq!(select_image_count(&caps(2, 2, UNDEFINED_EXTENT)), 2);
    }

    #[test]
    fn choose_is_idempotent_for_same_size() {
        let s = support(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]);
        let a = SwapchainConfig::choose(&s, 400, 300, false).unwrap();
        let b = SwapchainConfig::choose(&s, 400, 300, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.extent,
            vk::Extent2D {
                width: 400,
                height: 300
            }
        );
        assert_eq!(a.image_count, 3);
        assert_eq!(a.present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn choose_rejects_surface_without_formats() {
        let mut s = support(vec![vk::PresentModeKHR::FIFO]);
        s.formats.clear();
        assert!(matches!(
            SwapchainConfig::choose(&s, 800, 600, false),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn present_result_rebuild_flags() {
        assert!(!PresentResult::Presented.needs_rebuild());
        assert!(PresentResult::Suboptimal.needs_rebuild());
        assert!(PresentResult::OutOfDate.needs_rebuild());
    }
}
