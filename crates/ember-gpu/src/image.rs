//! Image helpers: views, layout transitions, buffer-to-image copies, depth
//! format selection and samplers.

use crate::error::{GpuError, Result};
use ash::vk;

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Access masks and pipeline stages for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the transitions texture upload needs.
///
/// Only `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` are known; anything else
/// is a caller bug and reported as [`GpuError::UnsupportedLayoutTransition`].
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(GpuError::UnsupportedLayoutTransition { old, new }),
    }
}

/// Whether `format` carries a stencil aspect.
pub const fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// First candidate whose optimal-tiling features include depth attachment use.
///
/// `properties_of` is queried per candidate.
pub fn pick_depth_format(
    candidates: &[vk::Format],
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            properties_of(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| GpuError::UnsupportedDepthFormat(candidates.to_vec()))
}

/// Query the device for the preferred depth format.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    pick_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        // SAFETY: caller guarantees the handles are valid
        unsafe { instance.get_physical_device_format_properties(physical_device, format) }
    })
}

/// Create a 2D view over a single-mip, single-layer image.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    // SAFETY: caller guarantees the handles are valid
    let view = unsafe { device.create_image_view(&view_info, None)? };
    Ok(view)
}

/// Record a layout transition barrier for a color image.
///
/// # Safety
/// The device, command buffer and image must be valid; the command buffer
/// must be recording.
pub unsafe fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old, new)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    // SAFETY: caller guarantees the command buffer is recording
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Record a copy of tightly packed pixels from `buffer` into mip 0 of `image`.
///
/// # Safety
/// The command buffer must be recording and `image` must be in
/// `TRANSFER_DST_OPTIMAL`.
pub unsafe fn record_copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    // SAFETY: caller guarantees the command buffer is recording
    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

/// Create a linear, repeating sampler. Anisotropy is enabled when `max_anisotropy > 1`.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_sampler(device: &ash::Device, max_anisotropy: f32) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(max_anisotropy > 1.0)
        .max_anisotropy(max_anisotropy.max(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    // SAFETY: caller guarantees the device is valid
    let sampler = unsafe { device.create_sampler(&info, None)? };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_are_supported() {
        let to_dst = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let to_read = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_transition_is_a_hard_error() {
        let err = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GpuError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        ));
    }

    #[test]
    fn depth_format_prefers_first_supported_candidate() {
        let supported = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        };
        assert_eq!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, supported).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn no_depth_format_is_a_hard_error() {
        let none = |_: vk::Format| vk::FormatProperties::default();
        assert!(matches!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, none),
            Err(GpuError::UnsupportedDepthFormat(_))
        ));
    }
}
