//! GPU-ready vertex layout for voxel meshes

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Mesh vertex - 28 bytes, tightly packed for a vertex buffer
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Chunk-local position, one unit per voxel
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Palette index of the face's voxel
    pub material: u32,
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, material: u32) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            material,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 28);
    }

    #[test]
    fn test_cast_to_bytes() {
        let v = [MeshVertex::new(Vec3::ONE, Vec3::Y, 3)];
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[24..28], &3u32.to_ne_bytes());
    }
}
