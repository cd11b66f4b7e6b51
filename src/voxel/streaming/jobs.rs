//! Background mesh and collider jobs.
//!
//! Jobs are submitted with an immutable snapshot of the chunk and run on a
//! rayon pool. Results come back through a crossbeam channel that the world
//! drains once per tick; nothing is applied from a worker thread. A job whose
//! ticket was cancelled before it started is skipped, and one cancelled while
//! running still completes but is reported as cancelled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::mesh::{MeshConverter, MeshImportResult};
use crate::physics::{ColliderBox, VoxelColliderBuilder};
use crate::voxel::chunk::{ChunkCoord, NeighborFaces, VoxelGrid};
use crate::voxel::hierarchy::HierarchyMask;
use crate::voxel::palette::MaterialPalette;

/// What a job produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Mesh,
    Collider,
}

/// Main-thread record of a job in flight
#[derive(Clone, Debug)]
pub struct JobTicket {
    pub id: u64,
    pub kind: JobKind,
    /// Chunk dirty revision captured at submission
    pub revision: u64,
    cancel: Arc<AtomicBool>,
}

impl JobTicket {
    /// Mark the result as discardable; the job is not preempted
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Immutable view of a chunk taken at submission
#[derive(Clone)]
pub struct ChunkSnapshot {
    pub coord: ChunkCoord,
    /// World load generation of the chunk
    pub generation: u64,
    pub voxels: Arc<VoxelGrid>,
    pub mask: HierarchyMask,
}

/// Work description for one job
pub enum JobPayload {
    Mesh {
        snapshot: ChunkSnapshot,
        neighbors: NeighborFaces,
        palette: Arc<MaterialPalette>,
    },
    Collider {
        snapshot: ChunkSnapshot,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Mesh { .. } => JobKind::Mesh,
            JobPayload::Collider { .. } => JobKind::Collider,
        }
    }

    fn snapshot(&self) -> &ChunkSnapshot {
        match self {
            JobPayload::Mesh { snapshot, .. } | JobPayload::Collider { snapshot } => snapshot,
        }
    }
}

/// Product of a finished job
#[derive(Debug)]
pub enum JobOutput {
    Mesh(MeshImportResult),
    Collider(Vec<ColliderBox>),
}

/// Message sent back to the main thread
#[derive(Debug)]
pub struct JobResult {
    pub id: u64,
    pub kind: JobKind,
    pub coord: ChunkCoord,
    pub generation: u64,
    pub revision: u64,
    /// Cancelled before or during the run; output must be dropped
    pub cancelled: bool,
    /// `None` when skipped because of cancellation
    pub output: Option<Result<JobOutput>>,
    pub elapsed: Duration,
}

fn run_payload(payload: &JobPayload) -> Result<JobOutput> {
    match payload {
        JobPayload::Mesh {
            snapshot,
            neighbors,
            palette,
        } => MeshConverter::default()
            .convert(&snapshot.voxels, &snapshot.mask, neighbors, palette)
            .map(JobOutput::Mesh),
        JobPayload::Collider { snapshot } => {
            VoxelColliderBuilder::build(&snapshot.voxels, &snapshot.mask).map(JobOutput::Collider)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn execute(
    id: u64,
    revision: u64,
    payload: JobPayload,
    cancel: Arc<AtomicBool>,
    tx: Sender<JobResult>,
) {
    let start = Instant::now();
    let kind = payload.kind();
    let snapshot = payload.snapshot();
    let (coord, generation) = (snapshot.coord, snapshot.generation);

    let output = if cancel.load(Ordering::Relaxed) {
        None
    } else {
        let result = panic::catch_unwind(AssertUnwindSafe(|| run_payload(&payload)))
            .unwrap_or_else(|p| Err(Error::JobFailed(panic_message(p))));
        Some(result)
    };

    // Receiver gone means the scheduler was dropped; nothing to report to
    let _ = tx.send(JobResult {
        id,
        kind,
        coord,
        generation,
        revision,
        cancelled: cancel.load(Ordering::Relaxed),
        output,
        elapsed: start.elapsed(),
    });
}

/// Runs mesh and collider jobs off the main thread
pub struct JobScheduler {
    /// `None` runs jobs inline on the submitting thread
    pool: Option<rayon::ThreadPool>,
    tx: Sender<JobResult>,
    rx: Receiver<JobResult>,
    next_id: u64,
    in_flight: usize,
}

impl JobScheduler {
    /// Create a scheduler with `worker_threads` workers (0 = inline)
    pub fn new(worker_threads: usize) -> Self {
        let pool = if worker_threads == 0 {
            None
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .thread_name(|i| format!("voxel-job-{}", i))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("Failed to start job pool ({}), running jobs inline", e);
                    None
                }
            }
        };
        log::debug!(
            "Job scheduler ready: {}",
            match &pool {
                Some(p) => format!("{} worker threads", p.current_num_threads()),
                None => "inline".to_string(),
            }
        );

        let (tx, rx) = unbounded();
        Self {
            pool,
            tx,
            rx,
            next_id: 0,
            in_flight: 0,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// Queue a job and return its ticket
    pub fn submit(&mut self, revision: u64, payload: JobPayload) -> JobTicket {
        self.next_id += 1;
        let ticket = JobTicket {
            id: self.next_id,
            kind: payload.kind(),
            revision,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        log::trace!(
            "Submitting {:?} job {} for {:?} (rev {})",
            ticket.kind,
            ticket.id,
            payload.snapshot().coord,
            revision
        );

        self.in_flight += 1;
        let (id, cancel, tx) = (ticket.id, Arc::clone(&ticket.cancel), self.tx.clone());
        match &self.pool {
            Some(pool) => pool.spawn(move || execute(id, revision, payload, cancel, tx)),
            None => execute(id, revision, payload, cancel, tx),
        }
        ticket
    }

    /// All results that have arrived, without blocking
    pub fn drain(&mut self) -> Vec<JobResult> {
        let results: Vec<_> = self.rx.try_iter().collect();
        self.in_flight -= results.len();
        results
    }

    /// Block until one result arrives or `timeout` passes
    pub fn wait_one(&mut self, timeout: Duration) -> Option<JobResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight -= 1;
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Submitted jobs whose results were not yet drained
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn snapshot(size: u32, solid: &[UVec3]) -> ChunkSnapshot {
        let mut grid = VoxelGrid::new(size);
        for p in solid {
            grid.set(p.x, p.y, p.z, 1);
        }
        let mut mask = HierarchyMask::new(size, 2);
        mask.rebuild(grid.cells());
        ChunkSnapshot {
            coord: ChunkCoord::new(0, 0, 0),
            generation: 1,
            voxels: Arc::new(grid),
            mask,
        }
    }

    fn collect(scheduler: &mut JobScheduler, count: usize) -> Vec<JobResult> {
        let mut results = Vec::new();
        while results.len() < count {
            match scheduler.wait_one(Duration::from_secs(5)) {
                Some(r) => results.push(r),
                None => panic!("timed out waiting for jobs"),
            }
        }
        results
    }

    #[test]
    fn test_inline_collider_job() {
        let mut scheduler = JobScheduler::new(0);
        assert!(scheduler.is_inline());
        let ticket = scheduler.submit(3, JobPayload::Collider { snapshot: snapshot(4, &[UVec3::ZERO]) });
        assert_eq!(ticket.kind, JobKind::Collider);

        let results = scheduler.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(scheduler.in_flight(), 0);
        let result = &results[0];
        assert_eq!(result.revision, 3);
        assert!(!result.cancelled);
        match &result.output {
            Some(Ok(JobOutput::Collider(boxes))) => assert_eq!(boxes.len(), 1),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_pooled_mesh_jobs() {
        let mut scheduler = JobScheduler::new(2);
        let mut palette = MaterialPalette::new();
        palette.register_color("stone", glam::Vec4::ONE).unwrap();
        let palette = Arc::new(palette);
        for _ in 0..8 {
            scheduler.submit(
                1,
                JobPayload::Mesh {
                    snapshot: snapshot(8, &[UVec3::new(3, 3, 3)]),
                    neighbors: NeighborFaces::default(),
                    palette: Arc::clone(&palette),
                },
            );
        }
        let results = collect(&mut scheduler, 8);
        assert_eq!(scheduler.in_flight(), 0);
        for r in results {
            match r.output {
                Some(Ok(JobOutput::Mesh(mesh))) => assert_eq!(mesh.vertices.len(), 24),
                other => panic!("unexpected output {:?}", other),
            }
        }
    }

    #[test]
    fn test_ticket_ids_increase() {
        let mut scheduler = JobScheduler::new(0);
        let a = scheduler.submit(0, JobPayload::Collider { snapshot: snapshot(4, &[]) });
        let b = scheduler.submit(0, JobPayload::Collider { snapshot: snapshot(4, &[]) });
        assert!(b.id > a.id);
        assert_eq!(scheduler.drain().len(), 2);
    }

    #[test]
    fn test_cancel_flag_reported() {
        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(true));
        execute(1, 0, JobPayload::Collider { snapshot: snapshot(4, &[UVec3::ONE]) }, cancel, tx);
        let result = rx.recv().unwrap();
        assert!(result.cancelled);
        assert!(result.output.is_none());
    }

    #[test]
    fn test_panic_message() {
        let p = panic::catch_unwind(|| -> u32 { panic!("boom") }).unwrap_err();
        assert_eq!(panic_message(p), "boom");
    }
}
