//! Scene: camera, light, models and the descriptor sets that bind them.

use crate::camera::Camera;
use crate::model::Model;
use crate::params::SceneParams;
use crate::pipeline::{frame_set_layout, model_set_layout, ScenePipeline};
use crate::recorder::{DrawItem, RenderScene};
use crate::texture::Texture;
use crate::uniforms::FrameUniforms;
use ash::vk;
use ember_core::{MeshData, Transform};
use ember_gpu::descriptors::{pool_sizes_for, write_uniform_buffer};
use ember_gpu::{DescriptorPool, GpuBuffer, GpuContext, GpuError, Result};
use std::sync::Arc;

/// Everything drawn each frame, with exclusive ownership of its GPU data.
///
/// Descriptor sets come from a pool sized for `model_capacity` models at
/// creation; adding more models than that is an error.
pub struct Scene {
    gpu: Arc<GpuContext>,
    pub camera: Camera,
    params: SceneParams,
    models: Vec<Model>,
    frame_uniforms: Vec<GpuBuffer>,
    frame_sets: Vec<vk::DescriptorSet>,
    descriptor_pool: DescriptorPool,
    model_set_layout: vk::DescriptorSetLayout,
    white: Texture,
    frames_in_flight: usize,
    model_capacity: usize,
}

impl Scene {
    /// Create an empty scene for a swapchain of the given extent.
    pub fn new(
        gpu: Arc<GpuContext>,
        pipeline: &ScenePipeline,
        frames_in_flight: usize,
        model_capacity: usize,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let to_u32 = |n: usize| {
            u32::try_from(n).map_err(|_| GpuError::InvalidState(format!("Count too large: {n}")))
        };
        let frame_sets = to_u32(frames_in_flight)?;
        let model_sets = to_u32(model_capacity * frames_in_flight)?;

        let frame_layout = frame_set_layout();
        let model_layout = model_set_layout();
        let pool_sizes = pool_sizes_for(&[
            (frame_layout.bindings(), frame_sets),
            (model_layout.bindings(), model_sets),
        ]);
        let device = gpu.device();
        // SAFETY: the device outlives the pool
        let descriptor_pool =
            unsafe { DescriptorPool::new(device, frame_sets + model_sets, &pool_sizes)? };

        let params = SceneParams::default();
        let mut camera = Camera::for_viewport(extent.width, extent.height);
        camera.set_position(params.camera_position);

        let mut scene = Self {
            white: Texture::white(&gpu)?,
            gpu: Arc::clone(&gpu),
            camera,
            params,
            models: Vec::new(),
            frame_uniforms: Vec::with_capacity(frames_in_flight),
            frame_sets: Vec::new(),
            descriptor_pool,
            model_set_layout: pipeline.model_set_layout(),
            frames_in_flight,
            model_capacity,
        };

        for slot in 0..frames_in_flight {
            scene.frame_uniforms.push(gpu.create_buffer(
                FrameUniforms::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
                &format!("frame uniforms {slot}"),
            )?);
        }

        let layouts = vec![pipeline.frame_set_layout(); frames_in_flight];
        // SAFETY: the pool and layouts belong to this device
        unsafe {
            scene.frame_sets = scene.descriptor_pool.allocate(device, &layouts)?;
            for (set, buffer) in scene.frame_sets.iter().zip(&scene.frame_uniforms) {
                write_uniform_buffer(device, *set, 0, buffer.buffer, FrameUniforms::SIZE);
            }
        }

        tracing::info!(
            "Scene created: {} frame slots, room for {} models",
            frames_in_flight,
            model_capacity
        );
        Ok(scene)
    }

    /// Upload a mesh and add it as the last model. Returns its index.
    pub fn add_model(
        &mut self,
        name: &str,
        mesh: &MeshData,
        transform: Transform,
    ) -> Result<usize> {
        let model = Model::new(&self.gpu, name, mesh, transform, self.frames_in_flight)?;
        self.push_model(model)
    }

    /// Like [`Self::add_model`], sampling `texture` instead of plain white.
    pub fn add_textured_model(
        &mut self,
        name: &str,
        mesh: &MeshData,
        transform: Transform,
        texture: Texture,
    ) -> Result<usize> {
        let model = Model::new(&self.gpu, name, mesh, transform, self.frames_in_flight)?
            .with_texture(texture);
        self.push_model(model)
    }

    fn push_model(&mut self, mut model: Model) -> Result<usize> {
        if self.models.len() >= self.model_capacity {
            // SAFETY: the model was never bound to a frame
            unsafe { model.destroy(&self.gpu)? };
            return Err(GpuError::InvalidState(format!(
                "Scene is full ({} models)",
                self.model_capacity
            )));
        }

        let layouts = vec![self.model_set_layout; self.frames_in_flight];
        let device = self.gpu.device();
        // SAFETY: fresh sets from this scene's pool
        let attached = unsafe {
            self.descriptor_pool
                .allocate(device, &layouts)
                .and_then(|sets| model.attach_descriptor_sets(device, sets, &self.white))
        };
        if let Err(e) = attached {
            // SAFETY: as above
            unsafe { model.destroy(&self.gpu)? };
            return Err(e);
        }

        self.models.push(model);
        Ok(self.models.len() - 1)
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut [Model] {
        &mut self.models
    }

    pub const fn params(&self) -> &SceneParams {
        &self.params
    }

    pub const fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Release every GPU object the scene owns. Calling it again does nothing.
    ///
    /// # Safety
    /// No in-flight frame may reference the scene.
    pub unsafe fn destroy(&mut self) -> Result<()> {
        let gpu = Arc::clone(&self.gpu);
        // SAFETY: caller guarantees the scene is idle
        unsafe {
            for model in &mut self.models {
                model.destroy(&gpu)?;
            }
            self.models.clear();
            for buffer in &mut self.frame_uniforms {
                gpu.free_buffer(buffer)?;
            }
            self.frame_uniforms.clear();
            self.frame_sets.clear();
            self.descriptor_pool.destroy(gpu.device());
            self.white.destroy(&gpu)?;
        }
        Ok(())
    }
}

impl RenderScene for Scene {
    fn prepare_frame(&mut self, slot: usize) -> Result<()> {
        self.camera.set_position(self.params.camera_position);

        let buffer = self.frame_uniforms.get(slot).ok_or_else(|| {
            GpuError::InvalidState(format!("No frame uniforms for slot {slot}"))
        })?;
        self.gpu
            .write_mapped(buffer, &FrameUniforms::new(&self.camera, &self.params))?;

        for model in &self.models {
            model.write_uniforms(&self.gpu, slot, &self.params)?;
        }
        Ok(())
    }

    fn frame_descriptor_set(&self, slot: usize) -> Option<vk::DescriptorSet> {
        self.frame_sets.get(slot).copied()
    }

    fn draw_items(&self, slot: usize, out: &mut Vec<DrawItem>) {
        out.extend(self.models.iter().filter_map(|model| model.draw_item(slot)));
    }

    fn params_mut(&mut self) -> &mut SceneParams {
        &mut self.params
    }

    fn clear_color(&self) -> [f32; 4] {
        self.params.clear_color
    }

    fn resize(&mut self, extent: vk::Extent2D) {
        self.camera.set_viewport(extent.width, extent.height);
        tracing::debug!("Camera aspect now {:.3}", self.camera.aspect);
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle before dropping scene: {e}");
        }
        // SAFETY: the device is idle
        if let Err(e) = unsafe { self.destroy() } {
            tracing::error!("Failed to release scene resources: {e}");
        }
    }
}
