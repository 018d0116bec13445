//! Application context: the device, swapchain and frame slots behind the
//! frame loop.

use std::sync::Arc;

use anyhow::Context as _;
use ash::vk;
use ember_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use ember_gpu::{
    load_spirv, AcquireResult, FenceStatus, FrameSlots, GpuContext, GpuContextBuilder,
    PresentResult, SurfaceContext, Swapchain, SwapchainInfo,
};
use ember_render::{FrameTarget, ScenePipeline, ShaderPair, VkCommandRecorder};
use winit::window::Window;

use crate::backend::{FrameBackend, RecordFn};
use crate::runner::AppConfig;

/// Everything the frame loop renders through.
///
/// Apps receive it in [`EmberApp::init`](crate::EmberApp::init) to build
/// their scene against the pipeline and swapchain extent.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues, shared with scenes.
    pub gpu: Arc<GpuContext>,
    surface: SurfaceContext,
    swapchain: Swapchain,
    pipeline: ScenePipeline,
    slots: FrameSlots,
    vsync: bool,
    destroyed: bool,
}

impl AppContext {
    /// Create the device, surface, swapchain, scene pipeline and frame slots
    /// for `window`.
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(config.title.clone())
            .validation(config.validation)
            .build(window.as_ref())?;
        let gpu = Arc::new(gpu);

        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        // SAFETY: no swapchain exists yet
        let mut swapchain = unsafe {
            surface.create_swapchain(&gpu, width, height, config.vsync, vk::SwapchainKHR::null())?
        };
        let info = swapchain.info();
        tracing::info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            info.extent.width,
            info.extent.height,
            info.format,
            info.present_mode,
            info.image_count
        );

        let shaders = ShaderPair {
            vertex: load_spirv(&config.vertex_shader).context("loading vertex shader")?,
            fragment: load_spirv(&config.fragment_shader).context("loading fragment shader")?,
        };

        let device = gpu.device();
        // SAFETY: the device is valid and nothing has been submitted yet
        let (pipeline, slots) = unsafe {
            let pipeline = ScenePipeline::new(device, shaders, info.format, gpu.depth_format())?;
            swapchain.create_framebuffers(device, pipeline.render_pass())?;
            let slots =
                FrameSlots::new(device, gpu.queue_families().graphics, config.frames_in_flight)?;
            (pipeline, slots)
        };

        Ok(Self {
            window,
            gpu,
            surface,
            swapchain,
            pipeline,
            slots,
            vsync: config.vsync,
            destroyed: false,
        })
    }

    /// Shared handle to the GPU context.
    pub fn gpu(&self) -> Arc<GpuContext> {
        Arc::clone(&self.gpu)
    }

    /// The pipeline scenes are drawn with.
    pub const fn pipeline(&self) -> &ScenePipeline {
        &self.pipeline
    }

    /// Current swapchain extent.
    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Aspect ratio of the swapchain.
    #[allow(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    pub const fn vsync(&self) -> bool {
        self.vsync
    }

    fn swapchain_loader(&self) -> anyhow::Result<&ash::khr::swapchain::Device> {
        Ok(self.surface.swapchain_loader()?)
    }

    /// Destroy slots, pipeline, swapchain and surface. Calling it again
    /// does nothing.
    pub(crate) fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }

        let gpu = Arc::clone(&self.gpu);
        let device = gpu.device();
        // SAFETY: the device is idle
        unsafe {
            self.slots.destroy(device);
            self.pipeline.destroy(device);
            match self.surface.swapchain_loader() {
                Ok(loader) => {
                    if let Err(e) = self.swapchain.destroy(&gpu, loader) {
                        tracing::error!("Failed to destroy swapchain: {e}");
                    }
                }
                Err(e) => tracing::error!("Failed to destroy swapchain: {e}"),
            }
            self.surface.destroy();
        }
        tracing::debug!("Application context destroyed");
    }
}

impl FrameBackend for AppContext {
    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        self.swapchain.info()
    }

    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> anyhow::Result<FenceStatus> {
        let slot = self.slots.get(slot)?;
        // SAFETY: the fence belongs to this device
        Ok(unsafe { slot.wait(self.gpu.device(), timeout_ns)? })
    }

    fn acquire_image(&mut self, slot: usize, timeout_ns: u64) -> anyhow::Result<AcquireResult> {
        let semaphore = self.slots.get(slot)?.image_available;
        let loader = self.swapchain_loader()?;
        // SAFETY: the semaphore is unsignaled; its last wait was the slot's
        // previous submission, which has completed
        Ok(unsafe {
            self.swapchain.acquire_next_image(loader, semaphore, timeout_ns)?
        })
    }

    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()> {
        let slot = self.slots.get(slot)?;
        // SAFETY: the fence was waited on before the acquire
        unsafe { slot.reset(self.gpu.device())? };
        Ok(())
    }

    fn record(
        &mut self,
        slot: usize,
        image_index: u32,
        record: &mut RecordFn<'_>,
    ) -> anyhow::Result<()> {
        let cmd = self.slots.get(slot)?.command_buffer;
        let target = FrameTarget {
            render_pass: self.pipeline.render_pass(),
            framebuffer: self.swapchain.framebuffer(image_index)?,
            extent: self.swapchain.extent,
            pipeline: self.pipeline.pipeline(),
            layout: self.pipeline.layout(),
        };
        let device = self.gpu.device();

        // SAFETY: the slot's previous submission has completed
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            let mut recorder = VkCommandRecorder::new(device, cmd);
            record(&mut recorder, &target);
            end_command_buffer(device, cmd)?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> anyhow::Result<()> {
        let slot = *self.slots.get(slot)?;
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let command_buffers = [slot.command_buffer];

        // SAFETY: the command buffer is fully recorded and the fence was reset
        unsafe {
            submit_command_buffers(
                self.gpu.device(),
                self.gpu.graphics_queue(),
                &command_buffers,
                &wait_semaphores,
                &wait_stages,
                &signal_semaphores,
                slot.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> anyhow::Result<PresentResult> {
        let render_finished = self.slots.get(slot)?.render_finished;
        let loader = self.swapchain_loader()?;
        // SAFETY: render_finished is signaled by this slot's submission
        Ok(unsafe {
            self.swapchain.present(
                loader,
                self.gpu.present_queue(),
                image_index,
                &[render_finished],
            )?
        })
    }

    fn wait_idle(&mut self) -> anyhow::Result<()> {
        self.gpu.wait_idle()?;
        Ok(())
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<SwapchainInfo> {
        let gpu = Arc::clone(&self.gpu);
        let device = gpu.device();

        // SAFETY: the scheduler waited for device idle before calling this
        unsafe {
            let replacement = self.surface.create_swapchain(
                &gpu,
                width,
                height,
                self.vsync,
                self.swapchain.swapchain,
            )?;
            let mut old = std::mem::replace(&mut self.swapchain, replacement);
            old.destroy(&gpu, self.surface.swapchain_loader()?)?;

            let format = self.swapchain.format;
            if self.pipeline.rebuild_for_format(device, format)? {
                tracing::info!("Surface format changed to {:?}", format);
            }
            self.swapchain
                .create_framebuffers(device, self.pipeline.render_pass())?;
        }

        Ok(self.swapchain.info())
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}
