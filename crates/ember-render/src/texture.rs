//! Sampled 2D textures uploaded through a staging buffer.

use ember_gpu::image::{create_sampler, record_copy_buffer_to_image, record_layout_transition};
use ember_gpu::{GpuContext, GpuError, GpuImage, Result};
use ash::vk;
use std::path::Path;

/// Texel format for every texture; source images are converted to RGBA8.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Check that `pixels` holds exactly `width * height` RGBA8 texels.
pub fn validate_rgba8(width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GpuError::TextureLoad(format!(
            "Texture has zero extent: {width}x{height}"
        )));
    }
    let expected = u64::from(width) * u64::from(height) * 4;
    if pixels.len() as u64 != expected {
        return Err(GpuError::TextureLoad(format!(
            "Expected {expected} bytes for {width}x{height} RGBA8, got {}",
            pixels.len()
        )));
    }
    Ok(())
}

/// Device-local image with a view and sampler, in `SHADER_READ_ONLY_OPTIMAL`.
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Decode an image file and upload it.
    pub fn load(gpu: &GpuContext, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .map_err(|e| GpuError::TextureLoad(format!("{}: {e}", path.display())))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        tracing::info!("Loaded texture {} ({}x{})", path.display(), width, height);
        Self::from_rgba8(gpu, width, height, decoded.as_raw(), &path.display().to_string())
    }

    /// Opaque white 1x1 texture bound by untextured models.
    pub fn white(gpu: &GpuContext) -> Result<Self> {
        Self::from_rgba8(gpu, 1, 1, &[255, 255, 255, 255], "white texture")
    }

    /// Upload tightly packed RGBA8 pixels.
    pub fn from_rgba8(
        gpu: &GpuContext,
        width: u32,
        height: u32,
        pixels: &[u8],
        name: &str,
    ) -> Result<Self> {
        validate_rgba8(width, height, pixels)?;

        let mut staging = gpu.create_staging_buffer(pixels, &format!("{name} staging"))?;
        let uploaded = upload_image(gpu, &staging, width, height, name);
        gpu.free_buffer(&mut staging)?;
        let mut image = uploaded?;

        let aspect = vk::ImageAspectFlags::COLOR;
        let view = match gpu.create_image_view(image.image, TEXTURE_FORMAT, aspect) {
            Ok(view) => view,
            Err(e) => {
                gpu.free_image(&mut image)?;
                return Err(e);
            }
        };

        let anisotropy = gpu.capabilities().max_sampler_anisotropy;
        // SAFETY: the device outlives the sampler
        let sampler = match unsafe { create_sampler(gpu.device(), anisotropy) } {
            Ok(sampler) => sampler,
            Err(e) => {
                // SAFETY: the view was just created and is unused
                unsafe { gpu.device().destroy_image_view(view, None) };
                gpu.free_image(&mut image)?;
                return Err(e);
            }
        };

        Ok(Self {
            image,
            view,
            sampler,
        })
    }

    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Release the sampler, view and image. Calling it again does nothing.
    ///
    /// # Safety
    /// No in-flight frame may sample the texture.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        let device = gpu.device();
        // SAFETY: caller guarantees the texture is idle
        unsafe {
            if self.sampler != vk::Sampler::null() {
                device.destroy_sampler(self.sampler, None);
                self.sampler = vk::Sampler::null();
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
        }
        gpu.free_image(&mut self.image)
    }
}

/// Create the image and fill it from `staging`, leaving it shader-readable.
fn upload_image(
    gpu: &GpuContext,
    staging: &ember_gpu::GpuBuffer,
    width: u32,
    height: u32,
    name: &str,
) -> Result<GpuImage> {
    let mut image = gpu.create_image(
        width,
        height,
        TEXTURE_FORMAT,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        name,
    )?;

    let handle = image.image;
    let copied = gpu.execute_one_shot(|device, cmd| {
        // SAFETY: the command buffer is recording and both resources are live
        // until the blocking submit returns
        unsafe {
            record_layout_transition(
                device,
                cmd,
                handle,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            record_copy_buffer_to_image(device, cmd, staging.buffer, handle, width, height);
            record_layout_transition(
                device,
                cmd,
                handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        }
    });

    if let Err(e) = copied {
        gpu.free_image(&mut image)?;
        return Err(e);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_rgba8_size() {
        assert!(validate_rgba8(2, 3, &[0; 24]).is_ok());
    }

    #[test]
    fn rejects_short_pixel_data() {
        assert!(matches!(
            validate_rgba8(2, 2, &[0; 15]),
            Err(GpuError::TextureLoad(_))
        ));
    }

    #[test]
    fn rejects_zero_extent() {
        assert!(validate_rgba8(0, 4, &[]).is_err());
    }
}
