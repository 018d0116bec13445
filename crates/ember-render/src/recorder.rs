//! Command recording seam.
//!
//! Frame recording goes through [`CommandRecorder`] so the draw sequence can
//! be checked without a device. [`VkCommandRecorder`] is the real thing.

use crate::params::SceneParams;
use ember_gpu::Result;
use ash::vk;

/// Descriptor set index of the per-frame camera data.
pub const FRAME_SET: u32 = 0;
/// Descriptor set index of the per-model data.
pub const MODEL_SET: u32 = 1;

/// The subset of command buffer recording a frame needs.
pub trait CommandRecorder {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn set_viewport(&mut self, extent: vk::Extent2D);
    fn set_scissor(&mut self, extent: vk::Extent2D);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);
    fn draw_indexed(&mut self, index_count: u32);
    fn end_render_pass(&mut self);
}

/// Records into a Vulkan command buffer that is already in the recording state.
pub struct VkCommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> VkCommandRecorder<'a> {
    /// # Safety
    /// `cmd` must be a command buffer of `device` in the recording state for
    /// as long as the recorder is used.
    pub const unsafe fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

// SAFETY (all methods): `new` requires the command buffer to be recording and
// every handle passed in comes from the same device
impl CommandRecorder for VkCommandRecorder<'_> {
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &info, vk::SubpassContents::INLINE);
        }
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        #[allow(clippy::cast_precision_loss)]
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[scissor]) };
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_descriptor_set(
        &mut self,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0]) };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(self.cmd, index_count, 1, 0, 0, 0) };
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
    }
}

/// Everything needed to draw one model in one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub descriptor_set: vk::DescriptorSet,
}

/// Where and with what a frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// A scene the frame loop can draw.
pub trait RenderScene {
    /// Write the uniform buffers owned by `slot`. Only called once the slot's
    /// previous submission has completed.
    fn prepare_frame(&mut self, slot: usize) -> Result<()>;

    /// Camera descriptor set for `slot`, `None` if the scene has no set for it.
    fn frame_descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet>;

    /// Append one draw per model, in scene order.
    fn draw_items(&self, slot: usize, out: &mut Vec<DrawItem>);

    /// Tunable parameters, edited by overlays between update and render.
    fn params_mut(&mut self) -> &mut SceneParams;

    fn clear_color(&self) -> [f32; 4];

    /// The swapchain extent changed.
    fn resize(&mut self, extent: vk::Extent2D);
}

/// Record a full scene pass for `slot`: begin the pass, set dynamic state,
/// bind the pipeline and `frame_set`, draw every model, let `overlay` append
/// commands, end the pass.
///
/// `frame_set` is the scene's [`RenderScene::frame_descriptor_set`] for
/// `slot`, resolved by the caller before recording starts.
pub fn record_scene(
    rec: &mut dyn CommandRecorder,
    target: &FrameTarget,
    scene: &dyn RenderScene,
    slot: usize,
    frame_set: vk::DescriptorSet,
    overlay: impl FnOnce(&mut dyn CommandRecorder),
) {
    rec.begin_render_pass(
        target.render_pass,
        target.framebuffer,
        target.extent,
        scene.clear_color(),
    );
    rec.set_viewport(target.extent);
    rec.set_scissor(target.extent);
    rec.bind_pipeline(target.pipeline);
    rec.bind_descriptor_set(target.layout, FRAME_SET, frame_set);

    let mut draws = Vec::new();
    scene.draw_items(slot, &mut draws);
    for draw in &draws {
        rec.bind_vertex_buffer(draw.vertex_buffer);
        rec.bind_index_buffer(draw.index_buffer);
        rec.bind_descriptor_set(target.layout, MODEL_SET, draw.descriptor_set);
        rec.draw_indexed(draw.index_count);
    }

    overlay(rec);
    rec.end_render_pass();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, PartialEq)]
    enum Cmd {
        Begin(vk::Extent2D),
        Viewport(vk::Extent2D),
        Scissor(vk::Extent2D),
        Pipeline,
        Set(u32, u64),
        Vertex(u64),
        Index(u64),
        Draw(u32),
        End,
    }

    #[derive(Default)]
    struct Log(Vec<Cmd>);

    impl CommandRecorder for Log {
        fn begin_render_pass(
            &mut self,
            _: vk::RenderPass,
            _: vk::Framebuffer,
            extent: vk::Extent2D,
            _: [f32; 4],
        ) {
            self.0.push(Cmd::Begin(extent));
        }
        fn set_viewport(&mut self, extent: vk::Extent2D) {
            self.0.push(Cmd::Viewport(extent));
        }
        fn set_scissor(&mut self, extent: vk::Extent2D) {
            self.0.push(Cmd::Scissor(extent));
        }
        fn bind_pipeline(&mut self, _: vk::Pipeline) {
            self.0.push(Cmd::Pipeline);
        }
        fn bind_descriptor_set(
            &mut self,
            _: vk::PipelineLayout,
            index: u32,
            set: vk::DescriptorSet,
        ) {
            self.0.push(Cmd::Set(index, set.as_raw()));
        }
        fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Cmd::Vertex(buffer.as_raw()));
        }
        fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Cmd::Index(buffer.as_raw()));
        }
        fn draw_indexed(&mut self, count: u32) {
            self.0.push(Cmd::Draw(count));
        }
        fn end_render_pass(&mut self) {
            self.0.push(Cmd::End);
        }
    }

    struct TwoModels {
        params: SceneParams,
    }

    impl RenderScene for TwoModels {
        fn prepare_frame(&mut self, _: usize) -> Result<()> {
            Ok(())
        }
        fn frame_descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
            (slot < 2).then(|| vk::DescriptorSet::from_raw(100 + slot as u64))
        }
        fn draw_items(&self, slot: usize, out: &mut Vec<DrawItem>) {
            for model in 0..2u64 {
                out.push(DrawItem {
                    vertex_buffer: vk::Buffer::from_raw(10 + model),
                    index_buffer: vk::Buffer::from_raw(20 + model),
                    index_count: 36,
                    descriptor_set: vk::DescriptorSet::from_raw(200 + model * 10 + slot as u64),
                });
            }
        }
        fn params_mut(&mut self) -> &mut SceneParams {
            &mut self.params
        }
        fn clear_color(&self) -> [f32; 4] {
            self.params.clear_color
        }
        fn resize(&mut self, _: vk::Extent2D) {}
    }

    #[test]
    fn records_models_in_order_with_overlay_last() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let target = FrameTarget {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            extent,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        };
        let scene = TwoModels {
            params: SceneParams::default(),
        };
        let mut log = Log::default();

        let frame_set = scene.frame_descriptor_set(1).unwrap();
        record_scene(&mut log, &target, &scene, 1, frame_set, |rec| {
            rec.draw_indexed(0);
        });
        assert_eq!(
            log.0,
            vec![
                Cmd::Begin(extent),
                Cmd::Viewport(extent),
                Cmd::Scissor(extent),
                Cmd::Pipeline,
                Cmd::Set(FRAME_SET, 101),
                Cmd::Vertex(10),
                Cmd::Index(20),
                Cmd::Set(MODEL_SET, 201),
                Cmd::Draw(36),
                Cmd::Vertex(11),
                Cmd::Index(21),
                Cmd::Set(MODEL_SET, 211),
                Cmd::Draw(36),
                // overlay
                Cmd::Draw(0),
                Cmd::End,
            ]
        );
    }
}
