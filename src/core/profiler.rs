//! CPU scope profiling

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Aggregated timing for one named scope
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProfileSample {
    pub name: String,
    pub calls: u64,
    pub total_ms: f32,
    pub max_ms: f32,
}

#[derive(Default)]
struct Accumulator {
    calls: u64,
    total: Duration,
    max: Duration,
}

/// Collects scope durations from any thread
pub struct Profiler {
    enabled: bool,
    scopes: Mutex<HashMap<&'static str, Accumulator>>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start timing a scope; the duration is recorded when the guard drops
    pub fn scope(&self, name: &'static str) -> ProfileScope<'_> {
        ProfileScope {
            profiler: self,
            name,
            start: Instant::now(),
        }
    }

    /// Record an externally measured duration
    pub fn record(&self, name: &'static str, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut scopes = self.scopes.lock();
        let acc = scopes.entry(name).or_default();
        acc.calls += 1;
        acc.total += elapsed;
        acc.max = acc.max.max(elapsed);
    }

    /// Sorted copy of the current statistics
    pub fn snapshot(&self) -> Vec<ProfileSample> {
        let scopes = self.scopes.lock();
        let mut samples: Vec<ProfileSample> = scopes
            .iter()
            .map(|(name, acc)| ProfileSample {
                name: (*name).to_string(),
                calls: acc.calls,
                total_ms: acc.total.as_secs_f32() * 1000.0,
                max_ms: acc.max.as_secs_f32() * 1000.0,
            })
            .collect();
        samples.sort_by(|a, b| a.name.cmp(&b.name));
        samples
    }

    pub fn reset(&self) {
        self.scopes.lock().clear();
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Guard returned by [`Profiler::scope`]
pub struct ProfileScope<'a> {
    profiler: &'a Profiler,
    name: &'static str,
    start: Instant,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        self.profiler.record(self.name, self.start.elapsed());
    }
}
