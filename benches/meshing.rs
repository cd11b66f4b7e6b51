use criterion::{criterion_group, criterion_main, Criterion, black_box};

use glam::Vec4;

use voxcore::mesh::MeshConverter;
use voxcore::physics::VoxelColliderBuilder;
use voxcore::voxel::chunk::{ChunkCoord, VoxelGrid};
use voxcore::voxel::palette::MaterialPalette;
use voxcore::voxel::terrain::{NoiseTerrain, TerrainParams, TerrainSource};

fn palette() -> MaterialPalette {
    let mut palette = MaterialPalette::new();
    palette.register_color("stone", Vec4::new(0.5, 0.5, 0.5, 1.0)).unwrap();
    palette.register_color("grass", Vec4::new(0.2, 0.7, 0.2, 1.0)).unwrap();
    palette
}

fn terrain_chunk(size: u32) -> VoxelGrid {
    let terrain = NoiseTerrain::new(TerrainParams {
        height_scale: size as f32,
        ..Default::default()
    });
    let mut grid = VoxelGrid::new(size);
    terrain.generate(ChunkCoord::new(0, 0, 0), &mut grid);
    grid
}

fn sphere_chunk(size: u32) -> VoxelGrid {
    let mut grid = VoxelGrid::new(size);
    let c = size as f32 / 2.0;
    let r2 = (c - 2.0) * (c - 2.0);
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                let d = (x as f32 + 0.5 - c).powi(2) + (y as f32 + 0.5 - c).powi(2) + (z as f32 + 0.5 - c).powi(2);
                if d <= r2 {
                    grid.set(x, y, z, if y as f32 > c { 2 } else { 1 });
                }
            }
        }
    }
    grid
}

fn bench_mesh_terrain_32(c: &mut Criterion) {
    let grid = terrain_chunk(32);
    let palette = palette();

    c.bench_function("mesh_terrain_32_greedy", |b| {
        let converter = MeshConverter::new(true);
        b.iter(|| converter.convert_grid(black_box(&grid), &palette).unwrap());
    });
    c.bench_function("mesh_terrain_32_faces", |b| {
        let converter = MeshConverter::new(false);
        b.iter(|| converter.convert_grid(black_box(&grid), &palette).unwrap());
    });
}

fn bench_mesh_sphere_32(c: &mut Criterion) {
    let grid = sphere_chunk(32);
    let palette = palette();

    c.bench_function("mesh_sphere_32_greedy", |b| {
        let converter = MeshConverter::default();
        b.iter(|| converter.convert_grid(black_box(&grid), &palette).unwrap());
    });
}

fn bench_colliders(c: &mut Criterion) {
    let terrain = terrain_chunk(32);
    let sphere = sphere_chunk(32);

    c.bench_function("colliders_terrain_32", |b| {
        b.iter(|| VoxelColliderBuilder::build_grid(black_box(&terrain)).unwrap());
    });
    c.bench_function("colliders_sphere_32", |b| {
        b.iter(|| VoxelColliderBuilder::build_grid(black_box(&sphere)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_mesh_terrain_32,
    bench_mesh_sphere_32,
    bench_colliders,
);
criterion_main!(benches);
