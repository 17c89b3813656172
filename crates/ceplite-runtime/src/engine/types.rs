//! Public handle, metrics and report types for the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a registered query. Handles are dense indices in
/// registration order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryHandle(pub(crate) usize);

impl QueryHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine performance metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub rows_emitted: u64,
    pub listener_failures: u64,
    pub pattern_timeouts: u64,
    pub queries_count: usize,
}

/// Outcome of [`crate::Engine::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Partial pattern matches dropped without emitting
    pub pending_discarded: usize,
    /// Queries whose in-flight evaluation did not finish within the timeout
    pub queries_timed_out: Vec<String>,
    /// False if the engine had already been shut down
    pub first_shutdown: bool,
    pub metrics: EngineMetrics,
}

/// Lock-free counters behind [`EngineMetrics`]
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub events_ingested: AtomicU64,
    pub events_rejected: AtomicU64,
    pub rows_emitted: AtomicU64,
    pub listener_failures: AtomicU64,
    pub pattern_timeouts: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, queries_count: usize) -> EngineMetrics {
        EngineMetrics {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            pattern_timeouts: self.pattern_timeouts.load(Ordering::Relaxed),
            queries_count,
        }
    }
}
