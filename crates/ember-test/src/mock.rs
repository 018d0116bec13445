//! Device-free stand-ins for the frame loop's seams.
//!
//! [`MockBackend`] models the fence, semaphore and swapchain rules a Vulkan
//! driver would enforce and records every breach in
//! [`MockBackend::violations`] instead of crashing.

use std::collections::VecDeque;

use ash::vk::{self, Handle};
use ember_app::{FrameBackend, Overlay, RecordFn, WindowSurface};
use ember_gpu::{
    AcquireResult, FenceStatus, PresentResult, SurfaceSupport, SwapchainConfig, SwapchainInfo,
};
use ember_render::{Camera, CommandRecorder, DrawItem, FrameTarget, RenderScene, SceneParams};

use crate::{Result, TestError};

/// One call made on a [`MockBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    WaitSlot { slot: usize, status: FenceStatus },
    Acquire { slot: usize, result: AcquireResult },
    ResetSlot(usize),
    Record { slot: usize, image_index: u32 },
    Submit(usize),
    Present {
        slot: usize,
        image_index: u32,
        result: PresentResult,
    },
    WaitIdle,
    Rebuild(vk::Extent2D),
}

/// A command captured by [`MockRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedCommand {
    BeginRenderPass { extent: vk::Extent2D, framebuffer: u64 },
    Viewport(vk::Extent2D),
    Scissor(vk::Extent2D),
    BindPipeline,
    BindDescriptorSet { index: u32, set: u64 },
    BindVertexBuffer(u64),
    BindIndexBuffer(u64),
    DrawIndexed(u32),
    EndRenderPass,
}

/// Collects recorded commands, one list per recorded frame.
#[derive(Debug, Default)]
pub struct MockRecorder {
    frames: Vec<Vec<RecordedCommand>>,
}

impl MockRecorder {
    fn start_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    fn push(&mut self, command: RecordedCommand) {
        if self.frames.is_empty() {
            self.start_frame();
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push(command);
        }
    }

    pub fn frames(&self) -> &[Vec<RecordedCommand>] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&[RecordedCommand]> {
        self.frames.last().map(Vec::as_slice)
    }
}

impl CommandRecorder for MockRecorder {
    fn begin_render_pass(
        &mut self,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        _clear_color: [f32; 4],
    ) {
        self.push(RecordedCommand::BeginRenderPass {
            extent,
            framebuffer: framebuffer.as_raw(),
        });
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        self.push(RecordedCommand::Viewport(extent));
    }

    fn set_scissor(&mut self, extent: vk::Extent2D) {
        self.push(RecordedCommand::Scissor(extent));
    }

    fn bind_pipeline(&mut self, _pipeline: vk::Pipeline) {
        self.push(RecordedCommand::BindPipeline);
    }

    fn bind_descriptor_set(
        &mut self,
        _layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        self.push(RecordedCommand::BindDescriptorSet {
            index: set_index,
            set: set.as_raw(),
        });
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.push(RecordedCommand::BindVertexBuffer(buffer.as_raw()));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.push(RecordedCommand::BindIndexBuffer(buffer.as_raw()));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.push(RecordedCommand::DrawIndexed(index_count));
    }

    fn end_render_pass(&mut self) {
        self.push(RecordedCommand::EndRenderPass);
    }
}

/// Something the mock pretends to allocate and later free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockObject {
    Swapchain(u32),
    Slot(usize),
}

#[derive(Debug, Clone, Copy)]
struct MockSlot {
    fence_signaled: bool,
    /// Submitted and not yet observed complete.
    in_flight: bool,
    /// Image-acquired semaphore signaled and not yet consumed by a submit.
    semaphore_pending: bool,
    /// Image acquired for this slot and not yet presented.
    acquired_image: Option<u32>,
    recorded: bool,
}

impl MockSlot {
    const fn new() -> Self {
        Self {
            fence_signaled: true,
            in_flight: false,
            semaphore_pending: false,
            acquired_image: None,
            recorded: false,
        }
    }

    fn complete(&mut self) {
        if self.in_flight {
            self.in_flight = false;
            self.fence_signaled = true;
        }
    }
}

/// A [`FrameBackend`] with no device behind it.
///
/// Submitted work completes as soon as someone waits for it, unless a fence
/// timeout has been scripted with [`Self::script_fence_timeouts`].
pub struct MockBackend {
    support: SurfaceSupport,
    vsync: bool,
    info: SwapchainInfo,
    generation: u32,
    next_image: u32,
    slots: Vec<MockSlot>,
    idle: bool,
    events: Vec<BackendEvent>,
    recorder: MockRecorder,
    fence_timeouts: u32,
    acquire_results: VecDeque<AcquireResult>,
    present_results: VecDeque<PresentResult>,
    violations: Vec<String>,
    freed: Vec<MockObject>,
    double_frees: u32,
}

impl MockBackend {
    /// A backend with `frames_in_flight` slots and a swapchain for a
    /// `width` x `height` window.
    pub fn new(
        frames_in_flight: usize,
        width: u32,
        height: u32,
        present_modes: &[vk::PresentModeKHR],
        vsync: bool,
    ) -> Result<Self> {
        let support = mock_surface_support(present_modes);
        let info = SwapchainConfig::choose(&support, width, height, vsync)?.info();
        tracing::debug!("Mock swapchain: {:?}", info);
        Ok(Self {
            support,
            vsync,
            info,
            generation: 0,
            next_image: 0,
            slots: vec![MockSlot::new(); frames_in_flight],
            idle: true,
            events: Vec::new(),
            recorder: MockRecorder::default(),
            fence_timeouts: 0,
            acquire_results: VecDeque::new(),
            present_results: VecDeque::new(),
            violations: Vec::new(),
            freed: Vec::new(),
            double_frees: 0,
        })
    }

    /// Two slots, mailbox available, 800x600.
    pub fn standard() -> Result<Self> {
        Self::new(
            2,
            800,
            600,
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            false,
        )
    }

    /// The next `count` waits on an in-flight fence time out.
    pub fn script_fence_timeouts(&mut self, count: u32) {
        self.fence_timeouts += count;
    }

    /// Queue results for upcoming acquires; later acquires succeed normally.
    pub fn script_acquire(&mut self, result: AcquireResult) {
        self.acquire_results.push_back(result);
    }

    /// Queue results for upcoming presents.
    pub fn script_present(&mut self, result: PresentResult) {
        self.present_results.push_back(result);
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn count(&self, matches: impl Fn(&BackendEvent) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }

    pub const fn recorder(&self) -> &MockRecorder {
        &self.recorder
    }

    /// Protocol breaches observed so far.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub const fn double_frees(&self) -> u32 {
        self.double_frees
    }

    pub fn fence_signaled(&self, slot: usize) -> Option<bool> {
        self.slots.get(slot).map(|s| s.fence_signaled)
    }

    /// Release the swapchain and every slot. Every call frees again, so a
    /// second teardown shows up in [`Self::double_frees`].
    pub fn destroy(&mut self) {
        if self.slots.iter().any(|slot| slot.in_flight) {
            self.violate("destroyed while a slot is in flight".to_string());
        }
        self.free(MockObject::Swapchain(self.generation));
        for slot in 0..self.slots.len() {
            self.free(MockObject::Slot(slot));
        }
    }

    fn free(&mut self, object: MockObject) {
        if self.freed.contains(&object) {
            self.double_frees += 1;
            self.violate(format!("{object:?} freed twice"));
        } else {
            self.freed.push(object);
        }
    }

    fn violate(&mut self, message: String) {
        tracing::warn!("Mock backend violation: {}", message);
        self.violations.push(message);
    }

    fn slot_mut(&mut self, slot: usize) -> anyhow::Result<&mut MockSlot> {
        self.slots
            .get_mut(slot)
            .ok_or_else(|| TestError::SlotOutOfRange(slot).into())
    }

    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        vk::Framebuffer::from_raw(u64::from(self.generation) * 16 + u64::from(image_index) + 1)
    }
}

impl FrameBackend for MockBackend {
    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        self.info
    }

    fn wait_for_slot(&mut self, slot: usize, _timeout_ns: u64) -> anyhow::Result<FenceStatus> {
        // A fence with nothing in flight is signaled, even a never-submitted one
        let in_flight = self.slot_mut(slot)?.in_flight;
        let status = if in_flight && self.fence_timeouts > 0 {
            self.fence_timeouts -= 1;
            FenceStatus::TimedOut
        } else {
            self.slot_mut(slot)?.complete();
            FenceStatus::Signaled
        };
        self.events.push(BackendEvent::WaitSlot { slot, status });
        Ok(status)
    }

    fn acquire_image(&mut self, slot: usize, _timeout_ns: u64) -> anyhow::Result<AcquireResult> {
        let scripted = self.acquire_results.pop_front();
        let result = scripted.unwrap_or(AcquireResult::Acquired {
            image_index: self.next_image,
            suboptimal: false,
        });
        let state = *self.slot_mut(slot)?;

        if let AcquireResult::Acquired { image_index, .. } = result {
            if state.semaphore_pending {
                self.violate(format!("slot {slot} acquired with its semaphore still pending"));
            }
            if state.in_flight {
                self.violate(format!("slot {slot} acquired while in flight"));
            }
            let state = self.slot_mut(slot)?;
            state.semaphore_pending = true;
            state.acquired_image = Some(image_index);
            if scripted.is_none() {
                self.next_image = (self.next_image + 1) % self.info.image_count.max(1);
            }
        }
        self.events.push(BackendEvent::Acquire { slot, result });
        Ok(result)
    }

    fn reset_slot(&mut self, slot: usize) -> anyhow::Result<()> {
        let state = self.slot_mut(slot)?;
        let breach = state.in_flight;
        state.fence_signaled = false;
        if breach {
            self.violate(format!("slot {slot} fence reset while in flight"));
        }
        self.events.push(BackendEvent::ResetSlot(slot));
        Ok(())
    }

    fn record(
        &mut self,
        slot: usize,
        image_index: u32,
        record: &mut RecordFn<'_>,
    ) -> anyhow::Result<()> {
        let state = *self.slot_mut(slot)?;
        if state.in_flight {
            self.violate(format!("slot {slot} re-recorded before its fence was waited on"));
        }
        if state.acquired_image != Some(image_index) {
            self.violate(format!("slot {slot} recorded for unacquired image {image_index}"));
        }
        self.slot_mut(slot)?.recorded = true;

        let target = FrameTarget {
            render_pass: vk::RenderPass::from_raw(1),
            framebuffer: self.framebuffer(image_index),
            extent: self.info.extent,
            pipeline: vk::Pipeline::from_raw(1),
            layout: vk::PipelineLayout::from_raw(1),
        };
        self.recorder.start_frame();
        record(&mut self.recorder, &target);
        self.events.push(BackendEvent::Record { slot, image_index });
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> anyhow::Result<()> {
        let state = *self.slot_mut(slot)?;
        if state.fence_signaled {
            self.violate(format!("slot {slot} submitted with a signaled fence"));
        }
        if !state.semaphore_pending {
            self.violate(format!("slot {slot} submitted without an acquired image"));
        }
        if !state.recorded {
            self.violate(format!("slot {slot} submitted without recording"));
        }
        let state = self.slot_mut(slot)?;
        state.in_flight = true;
        state.semaphore_pending = false;
        state.recorded = false;
        self.idle = false;
        self.events.push(BackendEvent::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> anyhow::Result<PresentResult> {
        let state = self.slot_mut(slot)?;
        let acquired = state.acquired_image.take();
        if acquired != Some(image_index) {
            self.violate(format!("slot {slot} presented image {image_index} it never acquired"));
        }
        let result = self
            .present_results
            .pop_front()
            .unwrap_or(PresentResult::Presented);
        self.events.push(BackendEvent::Present {
            slot,
            image_index,
            result,
        });
        Ok(result)
    }

    fn wait_idle(&mut self) -> anyhow::Result<()> {
        for slot in &mut self.slots {
            slot.complete();
        }
        self.idle = true;
        self.events.push(BackendEvent::WaitIdle);
        Ok(())
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<SwapchainInfo> {
        if !self.idle {
            self.violate("swapchain rebuilt without waiting for device idle".to_string());
        }
        if width == 0 || height == 0 {
            self.violate(format!("swapchain rebuilt for a {width}x{height} framebuffer"));
        }

        let info = SwapchainConfig::choose(&self.support, width, height, self.vsync)?.info();
        self.free(MockObject::Swapchain(self.generation));
        self.generation += 1;
        self.next_image = 0;
        self.info = info;
        self.events.push(BackendEvent::Rebuild(info.extent));
        Ok(info)
    }
}

/// A surface that takes whatever size the window asks for, within
/// 1..=4096 per side, with two or three images.
pub fn mock_surface_support(present_modes: &[vk::PresentModeKHR]) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: present_modes.to_vec(),
    }
}

/// A window driven by the test.
#[derive(Debug)]
pub struct MockWindow {
    size: (u32, u32),
    resized: bool,
    close_requested: bool,
}

impl MockWindow {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            resized: false,
            close_requested: false,
        }
    }

    /// Change the framebuffer size and raise the resize flag.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.resized = true;
    }

    pub fn minimize(&mut self) {
        self.resize(0, 0);
    }

    pub fn close(&mut self) {
        self.close_requested = true;
    }
}

impl WindowSurface for MockWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}

/// Index count of every mock model.
pub const MOCK_INDEX_COUNT: u32 = 36;

/// A scene of `models` cubes with fake handles.
#[derive(Debug)]
pub struct MockScene {
    pub camera: Camera,
    params: SceneParams,
    models: u64,
    /// Slots `0..frame_sets` have a frame descriptor set.
    pub frame_sets: usize,
    prepared: Vec<usize>,
    resizes: Vec<vk::Extent2D>,
}

impl MockScene {
    pub fn new(models: u64, width: u32, height: u32) -> Self {
        Self {
            camera: Camera::for_viewport(width, height),
            params: SceneParams::default(),
            models,
            frame_sets: ember_app::MAX_FRAMES_IN_FLIGHT,
            prepared: Vec::new(),
            resizes: Vec::new(),
        }
    }

    /// Slots whose uniforms were written, in order.
    pub fn prepared(&self) -> &[usize] {
        &self.prepared
    }

    pub fn resizes(&self) -> &[vk::Extent2D] {
        &self.resizes
    }

    pub const fn params(&self) -> &SceneParams {
        &self.params
    }
}

impl RenderScene for MockScene {
    fn prepare_frame(&mut self, slot: usize) -> ember_gpu::Result<()> {
        self.camera.set_position(self.params.camera_position);
        self.prepared.push(slot);
        Ok(())
    }

    fn frame_descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
        (slot < self.frame_sets).then(|| vk::DescriptorSet::from_raw(100 + slot as u64))
    }

    fn draw_items(&self, slot: usize, out: &mut Vec<DrawItem>) {
        for model in 0..self.models {
            out.push(DrawItem {
                vertex_buffer: vk::Buffer::from_raw(1000 + model),
                index_buffer: vk::Buffer::from_raw(2000 + model),
                index_count: MOCK_INDEX_COUNT,
                descriptor_set: vk::DescriptorSet::from_raw(3000 + model * 8 + slot as u64),
            });
        }
    }

    fn params_mut(&mut self) -> &mut SceneParams {
        &mut self.params
    }

    fn clear_color(&self) -> [f32; 4] {
        self.params.clear_color
    }

    fn resize(&mut self, extent: vk::Extent2D) {
        self.camera.set_viewport(extent.width, extent.height);
        self.resizes.push(extent);
    }
}

/// Index count of the overlay's single draw.
pub const OVERLAY_INDEX_COUNT: u32 = 6;

/// Moves the light each frame and draws one quad.
#[derive(Debug, Default)]
pub struct MockOverlay {
    pub tuned: u32,
    pub recorded: u32,
}

impl Overlay for MockOverlay {
    fn tune(&mut self, params: &mut SceneParams) {
        self.tuned += 1;
        params.light_position.x += 1.0;
    }

    fn record(&mut self, rec: &mut dyn CommandRecorder) {
        self.recorded += 1;
        rec.draw_indexed(OVERLAY_INDEX_COUNT);
    }
}
