//! GPU-resident meshes with per-slot uniform data.

use crate::params::SceneParams;
use crate::recorder::DrawItem;
use crate::texture::Texture;
use crate::uniforms::ModelUniforms;
use ash::vk;
use ember_core::{MeshData, Transform};
use ember_gpu::descriptors::{write_combined_image_sampler, write_uniform_buffer};
use ember_gpu::{GpuBuffer, GpuContext, GpuError, Result};

/// A mesh uploaded once to device-local memory, plus one mapped uniform
/// buffer and one descriptor set per frame slot.
pub struct Model {
    pub transform: Transform,
    name: String,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    uniform_buffers: Vec<GpuBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    texture: Option<Texture>,
}

impl Model {
    /// Upload `mesh` and allocate `frames_in_flight` uniform buffers.
    ///
    /// Descriptor sets are attached afterwards by the owning scene.
    pub fn new(
        gpu: &GpuContext,
        name: &str,
        mesh: &MeshData,
        transform: Transform,
        frames_in_flight: usize,
    ) -> Result<Self> {
        mesh.validate()
            .map_err(|e| GpuError::InvalidState(format!("Mesh {name}: {e}")))?;

        let mut model = Self {
            transform,
            name: name.to_string(),
            vertex_buffer: gpu.upload_device_local(
                bytemuck::cast_slice(&mesh.vertices),
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &format!("{name} vertices"),
            )?,
            index_buffer: GpuBuffer {
                buffer: vk::Buffer::null(),
                allocation: None,
                size: 0,
            },
            index_count: mesh.index_count(),
            uniform_buffers: Vec::with_capacity(frames_in_flight),
            descriptor_sets: Vec::new(),
            texture: None,
        };

        if let Err(e) = model.allocate_rest(gpu, mesh, frames_in_flight) {
            // SAFETY: nothing has been submitted that references the model
            unsafe { model.destroy(gpu)? };
            return Err(e);
        }

        tracing::debug!(
            "Model {} uploaded: {} vertices, {} indices",
            name,
            mesh.vertices.len(),
            model.index_count
        );
        Ok(model)
    }

    fn allocate_rest(
        &mut self,
        gpu: &GpuContext,
        mesh: &MeshData,
        frames_in_flight: usize,
    ) -> Result<()> {
        self.index_buffer = gpu.upload_device_local(
            bytemuck::cast_slice(&mesh.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{} indices", self.name),
        )?;
        for slot in 0..frames_in_flight {
            self.uniform_buffers.push(gpu.create_buffer(
                ModelUniforms::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
                &format!("{} uniforms {slot}", self.name),
            )?);
        }
        Ok(())
    }

    /// Give the model its own texture instead of the scene default.
    #[must_use]
    pub fn with_texture(mut self, texture: Texture) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    pub const fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    /// Point one descriptor set per slot at this model's uniform buffer and
    /// at `fallback` unless the model has its own texture.
    ///
    /// # Safety
    /// The sets must come from a layout matching the model set and must not
    /// be in use.
    pub unsafe fn attach_descriptor_sets(
        &mut self,
        device: &ash::Device,
        sets: Vec<vk::DescriptorSet>,
        fallback: &Texture,
    ) -> Result<()> {
        if sets.len() != self.uniform_buffers.len() {
            return Err(GpuError::InvalidState(format!(
                "Model {} has {} uniform buffers but got {} descriptor sets",
                self.name,
                self.uniform_buffers.len(),
                sets.len()
            )));
        }

        let texture = self.texture.as_ref().unwrap_or(fallback);
        for (set, buffer) in sets.iter().zip(&self.uniform_buffers) {
            // SAFETY: caller guarantees the sets are idle
            unsafe {
                write_uniform_buffer(device, *set, 0, buffer.buffer, ModelUniforms::SIZE);
                write_combined_image_sampler(device, *set, 1, texture.view(), texture.sampler());
            }
        }
        self.descriptor_sets = sets;
        Ok(())
    }

    /// Write transform and material into the uniform buffer owned by `slot`.
    pub fn write_uniforms(
        &self,
        gpu: &GpuContext,
        slot: usize,
        params: &SceneParams,
    ) -> Result<()> {
        let buffer = self.uniform_buffers.get(slot).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "Model {} has no uniform buffer for slot {slot}",
                self.name
            ))
        })?;
        gpu.write_mapped(buffer, &ModelUniforms::new(&self.transform, params))
    }

    /// Draw data for `slot`, or `None` before descriptor sets are attached.
    pub fn draw_item(&self, slot: usize) -> Option<DrawItem> {
        self.descriptor_sets.get(slot).map(|&descriptor_set| DrawItem {
            vertex_buffer: self.vertex_buffer.buffer,
            index_buffer: self.index_buffer.buffer,
            index_count: self.index_count,
            descriptor_set,
        })
    }

    /// Free buffers and the owned texture. Descriptor sets are released with
    /// their pool. Calling it again does nothing.
    ///
    /// # Safety
    /// No in-flight frame may reference the model.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        self.descriptor_sets.clear();
        for buffer in &mut self.uniform_buffers {
            gpu.free_buffer(buffer)?;
        }
        self.uniform_buffers.clear();
        gpu.free_buffer(&mut self.index_buffer)?;
        gpu.free_buffer(&mut self.vertex_buffer)?;
        if let Some(texture) = &mut self.texture {
            // SAFETY: caller guarantees the model is idle
            unsafe { texture.destroy(gpu)? };
        }
        Ok(())
    }
}
