//! Material palette: small voxel indices to shared material descriptors.
//!
//! Index 0 is reserved for empty space. Entries are append-only for the
//! lifetime of a palette, so an index handed out once always means the same
//! material. Worlds share palettes as `Arc<MaterialPalette>` snapshots;
//! registering a material on a shared palette copies it first, leaving
//! snapshots held by in-flight jobs untouched.

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Palette index stored in every voxel cell
pub type MaterialId = u8;

/// Material index of empty space
pub const EMPTY: MaterialId = 0;

/// Maximum number of entries including the reserved empty slot
pub const MAX_MATERIALS: usize = 256;

/// Physical properties used by collision and destruction
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalMaterial {
    /// Mass per cubic voxel
    pub density: f32,
    pub friction: f32,
    pub hardness: f32,
    /// Load a voxel can carry before breaking (scaled by 10 in integrity checks)
    pub structural_health: f32,
}

impl Default for PhysicalMaterial {
    fn default() -> Self {
        Self {
            density: 1.0,
            friction: 0.5,
            hardness: 1.0,
            structural_health: 1.0,
        }
    }
}

/// Visual properties consumed by the renderer
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneMaterial {
    pub color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
    pub emission: f32,
}

impl Default for SceneMaterial {
    fn default() -> Self {
        Self {
            color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            roughness: 0.8,
            metallic: 0.0,
            emission: 0.0,
        }
    }
}

/// One palette entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub name: String,
    pub physical: PhysicalMaterial,
    pub scene: SceneMaterial,
}

/// Ordered, append-only list of materials
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterialPalette {
    entries: Vec<MaterialEntry>,
}

impl MaterialPalette {
    /// Palette holding only the reserved empty entry
    pub fn new() -> Self {
        Self {
            entries: vec![MaterialEntry {
                name: "empty".to_string(),
                physical: PhysicalMaterial {
                    density: 0.0,
                    ..Default::default()
                },
                scene: SceneMaterial {
                    color: Vec4::ZERO,
                    ..Default::default()
                },
            }],
        }
    }

    /// Append a material and return its index
    pub fn register(
        &mut self,
        name: impl Into<String>,
        physical: PhysicalMaterial,
        scene: SceneMaterial,
    ) -> Result<MaterialId> {
        if self.entries.len() >= MAX_MATERIALS {
            return Err(Error::PaletteFull);
        }
        let id = self.entries.len() as MaterialId;
        let name = name.into();
        log::debug!("Registered material {} as index {}", name, id);
        self.entries.push(MaterialEntry { name, physical, scene });
        Ok(id)
    }

    /// Register a material with default physical properties and the given color
    pub fn register_color(&mut self, name: impl Into<String>, color: Vec4) -> Result<MaterialId> {
        self.register(
            name,
            PhysicalMaterial::default(),
            SceneMaterial {
                color,
                ..Default::default()
            },
        )
    }

    pub fn get(&self, id: MaterialId) -> Option<&MaterialEntry> {
        self.entries.get(id as usize)
    }

    /// Physical properties, or defaults for an unknown index
    pub fn physical(&self, id: MaterialId) -> PhysicalMaterial {
        self.get(id).map(|e| e.physical).unwrap_or_default()
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        (id as usize) < self.entries.len()
    }

    /// Fail with `MalformedVoxelData` if any cell uses an unregistered index
    pub fn check_cells(&self, cells: &[MaterialId]) -> Result<()> {
        let mut seen = [false; MAX_MATERIALS];
        for &m in cells {
            seen[m as usize] = true;
        }
        match (self.entries.len()..MAX_MATERIALS).find(|&m| seen[m]) {
            Some(m) => Err(Error::MalformedVoxelData(format!(
                "material {} is not in the palette ({} entries)",
                m,
                self.entries.len()
            ))),
            None => Ok(()),
        }
    }

    /// Number of entries including the empty slot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing beyond the empty slot is registered
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| i as MaterialId)
    }

    pub fn entries(&self) -> &[MaterialEntry] {
        &self.entries
    }

    /// Scene materials in palette order, ready for a GPU material buffer
    pub fn scene_materials(&self) -> Vec<SceneMaterial> {
        self.entries.iter().map(|e| e.scene).collect()
    }
}

impl Default for MaterialPalette {
    fn default() -> Self {
        Self::new()
    }
}
