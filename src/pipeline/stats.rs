//! In-process pipeline counters
//!
//! Observability only; no coordination decision reads them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pipeline statistics (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub monitors_checked: AtomicU64,
    pub posts_discovered: AtomicU64,
    pub posts_generated: AtomicU64,
    pub posts_published: AtomicU64,
    /// Tasks whose handler errored or reported a failure
    pub tasks_failed: AtomicU64,
    /// Malformed entries dropped without handling
    pub tasks_dropped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_monitors_checked(&self, n: u64) {
        self.monitors_checked.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_discovered(&self, n: u64) {
        self.posts_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_generated(&self, n: u64) {
        self.posts_generated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.posts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            monitors_checked: self.monitors_checked.load(Ordering::Relaxed),
            posts_discovered: self.posts_discovered.load(Ordering::Relaxed),
            posts_generated: self.posts_generated.load(Ordering::Relaxed),
            posts_published: self.posts_published.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub monitors_checked: u64,
    pub posts_discovered: u64,
    pub posts_generated: u64,
    pub posts_published: u64,
    pub tasks_failed: u64,
    pub tasks_dropped: u64,
}

impl StatsSnapshot {
    /// Field/value pairs for the stats hash
    pub fn to_fields(&self) -> Vec<(String, String)> {
        [
            ("monitors_checked", self.monitors_checked),
            ("posts_discovered", self.posts_discovered),
            ("posts_generated", self.posts_generated),
            ("posts_published", self.posts_published),
            ("tasks_failed", self.tasks_failed),
            ("tasks_dropped", self.tasks_dropped),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
    }
}
