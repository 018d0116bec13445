//! The lit, textured mesh pipeline and the render pass it draws in.
//!
//! Descriptor layout:
//! - set 0, binding 0: [`FrameUniforms`](crate::uniforms::FrameUniforms)
//! - set 1, binding 0: [`ModelUniforms`](crate::uniforms::ModelUniforms)
//! - set 1, binding 1: combined image sampler

use ember_core::Vertex;
use ember_gpu::{
    DescriptorSetLayoutBuilder, GraphicsPipeline, GraphicsPipelineConfig, RenderPass, Result,
    SpirV,
};
use ash::vk;
use std::mem::{offset_of, size_of};

/// Vertex buffer binding and attribute layout matching [`Vertex`].
pub fn vertex_input() -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    #[allow(clippy::cast_possible_truncation)]
    let offset = |o: usize| o as u32;

    let bindings = vec![vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(offset(size_of::<Vertex>()))
        .input_rate(vk::VertexInputRate::VERTEX)];

    let attribute = |location, format, byte_offset| {
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(location)
            .format(format)
            .offset(offset(byte_offset))
    };
    let attributes = vec![
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
    ];

    (bindings, attributes)
}

/// Bindings of descriptor set 0.
pub fn frame_set_layout<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
}

/// Bindings of descriptor set 1.
pub fn model_set_layout<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
}

/// Compiled vertex and fragment stages.
#[derive(Clone)]
pub struct ShaderPair {
    pub vertex: SpirV,
    pub fragment: SpirV,
}

/// Render pass, pipeline and descriptor set layouts for scene drawing.
///
/// The render pass and pipeline depend on the swapchain color format and are
/// rebuilt by [`Self::rebuild_for_format`] when it changes. Set layouts never
/// change, so descriptor sets survive a rebuild.
pub struct ScenePipeline {
    shaders: ShaderPair,
    render_pass: RenderPass,
    pipeline: GraphicsPipeline,
    frame_set_layout: vk::DescriptorSetLayout,
    model_set_layout: vk::DescriptorSetLayout,
}

impl ScenePipeline {
    /// Build layouts, render pass and pipeline for the given attachment formats.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        shaders: ShaderPair,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        // SAFETY: caller guarantees the device is valid; partial results are
        // destroyed on failure
        unsafe {
            let frame_set_layout = frame_set_layout().build(device)?;
            let model_set_layout = match model_set_layout().build(device) {
                Ok(layout) => layout,
                Err(e) => {
                    device.destroy_descriptor_set_layout(frame_set_layout, None);
                    return Err(e);
                }
            };

            let built = build_pass_and_pipeline(
                device,
                &shaders,
                color_format,
                depth_format,
                &[frame_set_layout, model_set_layout],
            );
            match built {
                Ok((render_pass, pipeline)) => {
                    tracing::info!("Scene pipeline created for {:?}", color_format);
                    Ok(Self {
                        shaders,
                        render_pass,
                        pipeline,
                        frame_set_layout,
                        model_set_layout,
                    })
                }
                Err(e) => {
                    device.destroy_descriptor_set_layout(model_set_layout, None);
                    device.destroy_descriptor_set_layout(frame_set_layout, None);
                    Err(e)
                }
            }
        }
    }

    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.render_pass
    }

    pub const fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.pipeline
    }

    pub const fn layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout
    }

    pub const fn color_format(&self) -> vk::Format {
        self.render_pass.color_format
    }

    pub const fn frame_set_layout(&self) -> vk::DescriptorSetLayout {
        self.frame_set_layout
    }

    pub const fn model_set_layout(&self) -> vk::DescriptorSetLayout {
        self.model_set_layout
    }

    /// Recreate the render pass and pipeline if `color_format` differs from
    /// the current one. Returns whether anything was rebuilt.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn rebuild_for_format(
        &mut self,
        device: &ash::Device,
        color_format: vk::Format,
    ) -> Result<bool> {
        if color_format == self.color_format() {
            return Ok(false);
        }

        let depth_format = self.render_pass.depth_format;
        // SAFETY: caller guarantees the device is idle
        unsafe {
            let (render_pass, pipeline) = build_pass_and_pipeline(
                device,
                &self.shaders,
                color_format,
                depth_format,
                &[self.frame_set_layout, self.model_set_layout],
            )?;
            self.pipeline.destroy(device);
            self.render_pass.destroy(device);
            self.render_pass = render_pass;
            self.pipeline = pipeline;
        }

        tracing::info!("Scene pipeline rebuilt for {:?}", color_format);
        Ok(true)
    }

    /// Destroy everything. Calling it again does nothing.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: caller guarantees the device is idle
        unsafe {
            self.pipeline.destroy(device);
            self.render_pass.destroy(device);
            if self.model_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.model_set_layout, None);
                self.model_set_layout = vk::DescriptorSetLayout::null();
            }
            if self.frame_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.frame_set_layout, None);
                self.frame_set_layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}

unsafe fn build_pass_and_pipeline(
    device: &ash::Device,
    shaders: &ShaderPair,
    color_format: vk::Format,
    depth_format: vk::Format,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<(RenderPass, GraphicsPipeline)> {
    let (bindings, attributes) = vertex_input();
    let config = GraphicsPipelineConfig::new(shaders.vertex.clone(), shaders.fragment.clone())
        .with_vertex_input(bindings, attributes);

    // SAFETY: caller guarantees the device is valid
    unsafe {
        let mut render_pass = RenderPass::new(device, color_format, depth_format)?;
        match GraphicsPipeline::new(device, &config, render_pass.render_pass, set_layouts, &[]) {
            Ok(pipeline) => Ok((render_pass, pipeline)),
            Err(e) => {
                render_pass.destroy(device);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        let (bindings, attributes) = vertex_input();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 44);

        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);

        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn model_set_samples_in_fragment_stage() {
        let builder = model_set_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn frame_set_is_single_uniform() {
        let builder = frame_set_layout();
        assert_eq!(builder.bindings().len(), 1);
        assert_eq!(
            builder.bindings()[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }
}
