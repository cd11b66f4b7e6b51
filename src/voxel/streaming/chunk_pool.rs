//! Chunk Pool - recycled chunk storage for streaming
//!
//! - Released chunks are reset (voxels, mask, flags, results) and kept
//! - Acquire hands back a recycled chunk before allocating a new one
//! - Retained chunks are capped so a burst of unloads cannot pin memory
//!
//! All access goes through one mutex so the pool can be shared with
//! worker-side code.

use parking_lot::Mutex;

use crate::voxel::chunk::{Chunk, ChunkCoord};

/// Pool counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkPoolStats {
    /// Chunks currently waiting for reuse
    pub pooled: usize,
    /// Chunks ever allocated fresh
    pub allocated: u64,
    /// Acquires served from the pool
    pub reused: u64,
    /// Releases dropped because the pool was at capacity
    pub discarded: u64,
}

struct PoolInner {
    free: Vec<Box<Chunk>>,
    stats: ChunkPoolStats,
}

/// Recycles [`Chunk`] allocations
pub struct ChunkPool {
    chunk_size: u32,
    mask_block_size: u32,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl ChunkPool {
    /// Create a pool retaining at most `capacity` idle chunks
    pub fn new(chunk_size: u32, mask_block_size: u32, capacity: usize) -> Self {
        log::debug!(
            "Created chunk pool: {}^3 voxels per chunk, {} retained max",
            chunk_size,
            capacity
        );
        Self {
            chunk_size,
            mask_block_size,
            capacity,
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                stats: ChunkPoolStats::default(),
            }),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a clean chunk bound to `coord`
    pub fn acquire(&self, coord: ChunkCoord, generation: u64) -> Box<Chunk> {
        let recycled = {
            let mut inner = self.inner.lock();
            let chunk = inner.free.pop();
            if chunk.is_some() {
                inner.stats.reused += 1;
            } else {
                inner.stats.allocated += 1;
            }
            chunk
        };

        match recycled {
            Some(mut chunk) => {
                chunk.reset(coord, generation);
                chunk
            }
            None => {
                let mut chunk = Box::new(Chunk::new(coord, self.chunk_size, self.mask_block_size));
                chunk.reset(coord, generation);
                chunk
            }
        }
    }

    /// Return a chunk for reuse. Its contents are wiped immediately.
    pub fn release(&self, mut chunk: Box<Chunk>) {
        let coord = chunk.coord();
        chunk.cancel_jobs();
        chunk.reset(coord, 0);

        let mut inner = self.inner.lock();
        if inner.free.len() < self.capacity {
            inner.free.push(chunk);
        } else {
            inner.stats.discarded += 1;
        }
    }

    /// Number of idle chunks ready for reuse
    pub fn pooled(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn stats(&self) -> ChunkPoolStats {
        let inner = self.inner.lock();
        ChunkPoolStats {
            pooled: inner.free.len(),
            ..inner.stats
        }
    }

    /// Drop every idle chunk
    pub fn clear(&self) {
        self.inner.lock().free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;
    use std::sync::Arc;

    #[test]
    fn test_acquire_fresh() {
        let pool = ChunkPool::new(8, 2, 4);
        let chunk = pool.acquire(ChunkCoord::new(1, 2, 3), 7);
        assert_eq!(chunk.coord(), ChunkCoord::new(1, 2, 3));
        assert_eq!(chunk.generation(), 7);
        assert_eq!(chunk.size(), 8);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_release_then_acquire_reuses_and_resets() {
        let pool = ChunkPool::new(8, 2, 4);
        let mut chunk = pool.acquire(ChunkCoord::new(0, 0, 0), 1);
        chunk.set_voxel(UVec3::new(1, 1, 1), 3);
        pool.release(chunk);
        assert_eq!(pool.pooled(), 1);

        let chunk = pool.acquire(ChunkCoord::new(5, 5, 5), 2);
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(chunk.coord(), ChunkCoord::new(5, 5, 5));
        assert!(chunk.is_empty());
        assert_eq!(chunk.voxels().solid_count(), 0);
        assert!(!chunk.is_dirty_mesh());
        assert!(!chunk.is_dirty_collider());
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_capacity_limits_retained() {
        let pool = ChunkPool::new(4, 2, 1);
        let a = pool.acquire(ChunkCoord::new(0, 0, 0), 1);
        let b = pool.acquire(ChunkCoord::new(1, 0, 0), 2);
        pool.release(a);
        pool.release(b);
        let stats = pool.stats();
        assert_eq!(stats.pooled, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_shared_across_threads() {
        let pool = Arc::new(ChunkPool::new(4, 2, 64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..16 {
                        let chunk = pool.acquire(ChunkCoord::new(t, i, 0), 1);
                        pool.release(chunk);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.allocated + stats.reused, 64);
        assert!(stats.pooled <= 4);
    }
}
