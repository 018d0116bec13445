//! Cube mesh shown by the viewer.

use ember_core::{MeshData, Vertex};

/// (normal, u, v) per face with u x v == normal
const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
];

const CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// Axis-aligned cube centered on the origin, four vertices per face so every
/// face gets its own normal. Faces wind counter-clockwise seen from outside;
/// X faces are red, Y faces green, Z faces blue.
pub fn cube(half_extent: f32) -> anyhow::Result<MeshData> {
    let mut vertices = Vec::with_capacity(FACES.len() * 4);
    let mut indices = Vec::with_capacity(FACES.len() * 6);
    for (normal, u, v) in FACES {
        let base = u32::try_from(vertices.len())?;
        let color = normal.map(f32::abs);
        for (su, sv) in CORNERS {
            let position =
                std::array::from_fn(|i| (normal[i] + su * u[i] + sv * v[i]) * half_extent);
            let uv = [(su + 1.0) * 0.5, (1.0 - sv) * 0.5];
            vertices.push(Vertex::new(position, normal, uv).with_color(color));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Ok(MeshData::new(vertices, indices)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn faces_wind_outward() {
        let mesh = cube(1.0).unwrap();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.index_count(), 36);

        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(mesh.vertices[tri[i] as usize].position));
            let normal = Vec3::from(mesh.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
            assert!(a.dot(normal) > 0.0);
        }
    }

    #[test]
    fn scales_with_half_extent() {
        let mesh = cube(0.5).unwrap();
        for vertex in &mesh.vertices {
            for p in vertex.position {
                assert_relative_eq!(p.abs(), 0.5);
            }
        }
    }
}
