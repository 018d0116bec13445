//! Graphics pipeline creation.
//!
//! Pipelines target subpass 0 of a classic render pass. Viewport and scissor
//! are dynamic state, so a resize that keeps the color format keeps the
//! pipeline too.

use crate::error::{GpuError, Result};
use crate::shader::{create_shader_module, SpirV};
use ash::vk;

/// Fixed-function and shader inputs for a graphics pipeline.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_shader: SpirV,
    pub fragment_shader: SpirV,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
}

impl GraphicsPipelineConfig {
    /// Opaque, depth-tested, back-face-culled triangles with counter-clockwise
    /// front faces.
    pub fn new(vertex_shader: SpirV, fragment_shader: SpirV) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
        }
    }

    /// Set the vertex input layout.
    #[must_use]
    pub fn with_vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline for subpass 0 of `render_pass`.
    ///
    /// Driver rejection is reported as [`GpuError::PipelineCreation`].
    ///
    /// # Safety
    /// The device and render pass must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        render_pass: vk::RenderPass,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        // SAFETY: caller guarantees the device is valid
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| GpuError::PipelineCreation(format!("Layout: {e}")))?
        };

        // SAFETY: as above
        match unsafe { build_pipeline(device, config, render_pass, layout) } {
            Ok(pipeline) => Ok(Self { pipeline, layout }),
            Err(e) => {
                // SAFETY: the layout is not referenced by anything yet
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    /// Destroy the pipeline. Calling it again does nothing.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: caller guarantees the pipeline is idle
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

unsafe fn build_pipeline(
    device: &ash::Device,
    config: &GraphicsPipelineConfig,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    // SAFETY: caller guarantees the device is valid
    let vert_module = unsafe { create_shader_module(device, &config.vertex_shader)? };
    let frag_module = match unsafe { create_shader_module(device, &config.fragment_shader) } {
        Ok(module) => module,
        Err(e) => {
            // SAFETY: the module was created above and is not referenced yet
            unsafe { device.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&config.vertex_bindings)
        .vertex_attribute_descriptions(&config.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(config.topology)
        .primitive_restart_enable(false);

    // Counts only; the rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(config.polygon_mode)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(config.depth_test)
        .depth_write_enable(config.depth_write)
        .depth_compare_op(config.depth_compare);

    let blend_attachment = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blending =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachment);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: every referenced object is alive for the call
    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // SAFETY: modules are baked into the pipeline and no longer needed
    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }

    let pipelines = result.map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::PipelineCreation("Driver returned no pipeline".to_string()))
}
