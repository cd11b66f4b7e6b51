//! Destruction: connectivity islands, splitting and structural integrity

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use glam::IVec3;

use crate::core::types::Result;
use crate::voxel::chunk::VoxelGrid;
use crate::voxel::object::{EntityKind, VoxelEntity, VoxelObject};
use crate::voxel::palette::{MaterialId, MaterialPalette};

/// World height at or below which a voxel counts as resting on the ground
const ANCHOR_HEIGHT: f32 = 0.1;

/// Multiplier from `structural_health` to the load a voxel can carry
const STRENGTH_SCALE: f32 = 10.0;

const NEIGHBORS: [IVec3; 6] = [
    IVec3::X,
    IVec3::NEG_X,
    IVec3::Y,
    IVec3::NEG_Y,
    IVec3::Z,
    IVec3::NEG_Z,
];

/// A 6-connected group of solid voxels in entity space
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Island {
    pub voxels: Vec<IVec3>,
    pub materials: Vec<MaterialId>,
    /// At least one voxel touches the ground
    pub anchored: bool,
}

impl Island {
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Inclusive min/max corners
    pub fn bounds(&self) -> Option<(IVec3, IVec3)> {
        let first = *self.voxels.first()?;
        Some(self.voxels.iter().fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p))))
    }
}

fn is_anchored(entity: &VoxelEntity, point: IVec3) -> bool {
    entity.transform.transform_point(point.as_vec3()).y <= ANCHOR_HEIGHT
}

/// Every solid voxel of every part, keyed by entity-space position.
/// Earlier parts win where parts overlap.
fn collect_voxels(entity: &VoxelEntity) -> (Vec<IVec3>, HashMap<IVec3, MaterialId>) {
    let mut order = Vec::new();
    let mut materials = HashMap::new();
    for part in &entity.parts {
        let grid = part.voxels();
        let size = grid.size();
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    let m = grid.get(x, y, z);
                    if m == 0 {
                        continue;
                    }
                    let p = part.position + IVec3::new(x as i32, y as i32, z as i32);
                    if let Entry::Vacant(slot) = materials.entry(p) {
                        slot.insert(m);
                        order.push(p);
                    }
                }
            }
        }
    }
    (order, materials)
}

/// Split the entity's solid voxels into 6-connected islands.
///
/// Islands are discovered in part scan order, so identical input always
/// yields the same islands in the same order.
pub fn analyze_connectivity(entity: &VoxelEntity) -> Vec<Island> {
    let (order, materials) = collect_voxels(entity);
    let mut visited: HashSet<IVec3> = HashSet::with_capacity(order.len());
    let mut islands = Vec::new();
    let mut queue = VecDeque::new();

    for &start in &order {
        if !visited.insert(start) {
            continue;
        }
        let mut island = Island::default();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            island.voxels.push(current);
            island.materials.push(materials[&current]);
            if is_anchored(entity, current) {
                island.anchored = true;
            }
            for dir in NEIGHBORS {
                let next = current + dir;
                if materials.contains_key(&next) && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        islands.push(island);
    }

    log::debug!("Entity '{}': {} islands", entity.name, islands.len());
    islands
}

/// One new entity per island, each holding a single `part_size^3` part
/// placed at the island's min corner. Voxels beyond the part extent are
/// dropped.
pub fn split_entity(
    entity: &VoxelEntity,
    islands: &[Island],
    part_size: u32,
) -> Result<Vec<VoxelEntity>> {
    let mut fragments = Vec::with_capacity(islands.len());
    for (i, island) in islands.iter().enumerate() {
        let Some((min, _)) = island.bounds() else {
            continue;
        };
        let mut grid = VoxelGrid::new(part_size);
        let mut clipped = 0usize;
        for (&p, &m) in island.voxels.iter().zip(&island.materials) {
            let local = p - min;
            if grid.in_bounds(local) {
                let local = local.as_uvec3();
                grid.set(local.x, local.y, local.z, m);
            } else {
                clipped += 1;
            }
        }
        if clipped > 0 {
            log::warn!(
                "Fragment {} of '{}': clipped {} voxels beyond a {}^3 part",
                i,
                entity.name,
                clipped,
                part_size
            );
        }

        let part = VoxelObject::from_grid(grid, min)?;
        let mut fragment = VoxelEntity::object(
            format!("{}_frag_{}", entity.name, i),
            vec![part],
            Arc::clone(entity.palette()),
        )?
        .with_transform(entity.transform)
        .with_static(entity.is_static && island.anchored);
        fragment.kind = EntityKind::DynamicMesh;
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// Propagate load from the voxels furthest from the ground towards the
/// anchors and break every voxel that carries more than its material allows.
///
/// Each voxel adds its density to the load it receives from its children and
/// splits the total evenly between its parents (neighbours one step closer
/// to an anchor). A broken voxel passes nothing on. Returns true if any
/// voxel broke; the entity's parts are then dirty and need a rebuild.
/// Static entities and entities without anchors are never modified.
pub fn validate_structural_integrity(entity: &mut VoxelEntity, palette: &MaterialPalette) -> bool {
    if entity.is_static || entity.parts.is_empty() {
        return false;
    }

    let (order, materials) = collect_voxels(entity);
    let anchors: Vec<IVec3> = order
        .iter()
        .copied()
        .filter(|&p| is_anchored(entity, p))
        .collect();
    if anchors.is_empty() {
        return false;
    }

    // Breadth-first distance from the nearest anchor
    let mut distance: HashMap<IVec3, u32> = HashMap::with_capacity(order.len());
    let mut queue: VecDeque<IVec3> = anchors.iter().copied().collect();
    for &a in &anchors {
        distance.insert(a, 0);
    }
    let mut max_distance = 0;
    while let Some(current) = queue.pop_front() {
        let d = distance[&current];
        max_distance = max_distance.max(d);
        for dir in NEIGHBORS {
            let next = current + dir;
            if materials.contains_key(&next) && !distance.contains_key(&next) {
                distance.insert(next, d + 1);
                queue.push_back(next);
            }
        }
    }

    let mut layers: Vec<Vec<IVec3>> = vec![Vec::new(); max_distance as usize + 1];
    for &p in &order {
        if let Some(&d) = distance.get(&p) {
            layers[d as usize].push(p);
        }
    }

    let mut load: HashMap<IVec3, f32> = HashMap::new();
    let mut broken = Vec::new();
    for (d, layer) in layers.iter().enumerate().rev() {
        for &p in layer {
            let physical = palette.physical(materials[&p]);
            let total = physical.density + load.get(&p).copied().unwrap_or(0.0);
            if total > physical.structural_health * STRENGTH_SCALE {
                broken.push(p);
                continue;
            }
            if d == 0 {
                continue;
            }
            let parents: Vec<IVec3> = NEIGHBORS
                .iter()
                .map(|&dir| p + dir)
                .filter(|n| distance.get(n) == Some(&(d as u32 - 1)))
                .collect();
            let share = total / parents.len() as f32;
            for parent in parents {
                *load.entry(parent).or_insert(0.0) += share;
            }
        }
    }

    for &p in &broken {
        entity.set_voxel(p, 0);
    }
    if !broken.is_empty() {
        log::debug!("Entity '{}': {} voxels broke under load", entity.name, broken.len());
    }
    !broken.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Transform;
    use crate::voxel::palette::{PhysicalMaterial, SceneMaterial, EMPTY};
    use glam::{Vec3, Vec4};

    fn palette(structural_health: f32) -> Arc<MaterialPalette> {
        let mut palette = MaterialPalette::new();
        palette
            .register(
                "brick",
                PhysicalMaterial {
                    structural_health,
                    ..Default::default()
                },
                SceneMaterial::default(),
            )
            .unwrap();
        palette.register_color("glass", Vec4::ONE).unwrap();
        Arc::new(palette)
    }

    fn entity_with(voxels: &[(i32, i32, i32)], palette: Arc<MaterialPalette>) -> VoxelEntity {
        let mut grid = VoxelGrid::new(8);
        for &(x, y, z) in voxels {
            grid.set(x as u32, y as u32, z as u32, 1);
        }
        let part = VoxelObject::from_grid(grid, IVec3::ZERO).unwrap();
        VoxelEntity::object("wall", vec![part], palette).unwrap()
    }

    #[test]
    fn test_two_islands() {
        let entity = entity_with(&[(0, 0, 0), (1, 0, 0), (4, 4, 4), (4, 5, 4)], palette(1.0));
        let islands = analyze_connectivity(&entity);
        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].len(), 2);
        assert!(islands[0].anchored);
        assert_eq!(islands[1].len(), 2);
        assert!(!islands[1].anchored);
    }

    #[test]
    fn test_diagonal_is_not_connected() {
        let entity = entity_with(&[(0, 0, 0), (1, 1, 0)], palette(1.0));
        assert_eq!(analyze_connectivity(&entity).len(), 2);
    }

    #[test]
    fn test_anchoring_uses_world_position() {
        let entity = entity_with(&[(0, 0, 0)], palette(1.0))
            .with_transform(Transform::from_translation(Vec3::new(0.0, 3.0, 0.0)));
        assert!(!analyze_connectivity(&entity)[0].anchored);
    }

    #[test]
    fn test_islands_across_parts() {
        let mut a = VoxelGrid::new(4);
        a.set(3, 0, 0, 1);
        let mut b = VoxelGrid::new(4);
        b.set(0, 0, 0, 2);
        let parts = vec![
            VoxelObject::from_grid(a, IVec3::ZERO).unwrap(),
            VoxelObject::from_grid(b, IVec3::new(4, 0, 0)).unwrap(),
        ];
        let entity = VoxelEntity::object("pair", parts, palette(1.0)).unwrap();
        let islands = analyze_connectivity(&entity);
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].materials, vec![1, 2]);
    }

    #[test]
    fn test_split_entity() {
        let entity = entity_with(&[(0, 0, 0), (1, 0, 0), (4, 4, 4), (4, 5, 4)], palette(1.0))
            .with_static(true);
        let islands = analyze_connectivity(&entity);
        let fragments = split_entity(&entity, &islands, 8).unwrap();
        assert_eq!(fragments.len(), 2);

        assert_eq!(fragments[0].name, "wall_frag_0");
        assert!(fragments[0].is_static);
        assert!(!fragments[1].is_static);
        assert_eq!(fragments[1].parts[0].position, IVec3::new(4, 4, 4));
        assert_eq!(fragments[1].get_voxel(IVec3::new(4, 5, 4)), 1);
        assert_eq!(fragments[1].solid_count(), 2);
        assert!(!fragments[1].needs_rebuild());
    }

    #[test]
    fn test_split_clips_to_part_size() {
        let row: Vec<_> = (0..6).map(|x| (x, 0, 0)).collect();
        let entity = entity_with(&row, palette(1.0));
        let islands = analyze_connectivity(&entity);
        let fragments = split_entity(&entity, &islands, 4).unwrap();
        assert_eq!(fragments[0].solid_count(), 4);
    }

    #[test]
    fn test_weak_column_breaks_near_base() {
        // strength 3: the voxel at y=1 carries 3 from above plus itself
        let column: Vec<_> = (0..5).map(|y| (0, y, 0)).collect();
        let mut entity = entity_with(&column, palette(0.3));
        assert!(validate_structural_integrity(&mut entity, &palette(0.3)));
        assert_eq!(entity.get_voxel(IVec3::new(0, 1, 0)), EMPTY);
        assert_eq!(entity.get_voxel(IVec3::new(0, 0, 0)), 1);
        assert_eq!(entity.get_voxel(IVec3::new(0, 2, 0)), 1);
        assert!(entity.needs_rebuild());
        assert_eq!(analyze_connectivity(&entity).len(), 2);
    }

    #[test]
    fn test_strong_column_holds() {
        let column: Vec<_> = (0..5).map(|y| (0, y, 0)).collect();
        let mut entity = entity_with(&column, palette(1.0));
        assert!(!validate_structural_integrity(&mut entity, &palette(1.0)));
        assert_eq!(entity.solid_count(), 5);
    }

    #[test]
    fn test_static_and_floating_entities_skipped() {
        let column: Vec<_> = (0..5).map(|y| (0, y, 0)).collect();
        let mut fixed = entity_with(&column, palette(0.1)).with_static(true);
        assert!(!validate_structural_integrity(&mut fixed, &palette(0.1)));

        let mut floating = entity_with(&column, palette(0.1))
            .with_transform(Transform::from_translation(Vec3::new(0.0, 10.0, 0.0)));
        assert!(!validate_structural_integrity(&mut floating, &palette(0.1)));
        assert_eq!(floating.solid_count(), 5);
    }
}
