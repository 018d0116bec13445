//! Vertex and mesh types shared by the CPU and GPU sides.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// A single mesh vertex as laid out in the vertex buffer.
///
/// Field order and `#[repr(C)]` define the attribute offsets the pipeline uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
    /// Per-vertex color, multiplied with the texture sample
    pub color: [f32; 3],
}

impl Vertex {
    /// Create a vertex with a white color
    #[inline]
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
            color: [1.0, 1.0, 1.0],
        }
    }

    /// Replace the vertex color
    #[inline]
    #[must_use]
    pub const fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color;
        self
    }
}

/// Indexed triangle mesh ready for upload.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a mesh, checking that it is drawable.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self> {
        let mesh = Self { vertices, indices };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Number of indices to pass to an indexed draw.
    #[inline]
    pub fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }

    /// Size of the vertex data in bytes.
    #[inline]
    pub fn vertex_bytes(&self) -> u64 {
        std::mem::size_of_val(self.vertices.as_slice()) as u64
    }

    /// Size of the index data in bytes.
    #[inline]
    pub fn index_bytes(&self) -> u64 {
        std::mem::size_of_val(self.indices.as_slice()) as u64
    }

    /// Check that the mesh is non-empty, made of whole triangles, and every
    /// index refers to an existing vertex.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(Error::InvalidData("mesh has no geometry".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidData(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let vertex_count = self.vertices.len();
        if let Some(&bad) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= vertex_count)
        {
            return Err(Error::OutOfBounds(format!(
                "index {bad} exceeds vertex count {vertex_count}"
            )));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
        assert_eq!(std::mem::offset_of!(Vertex, color), 32);
    }

    #[test]
    fn valid_mesh_reports_sizes() {
        let mesh = MeshData::new(triangle(), vec![0, 1, 2]).unwrap();
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.vertex_bytes(), 3 * 44);
        assert_eq!(mesh.index_bytes(), 12);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let err = MeshData::new(triangle(), vec![0, 1, 3]).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds(_)));
    }

    #[test]
    fn rejects_partial_triangle() {
        assert!(MeshData::new(triangle(), vec![0, 1]).is_err());
        assert!(MeshData::new(Vec::new(), Vec::new()).is_err());
    }
}
