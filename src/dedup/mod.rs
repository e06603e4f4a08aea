//! Deduplication cache
//!
//! One set of content fingerprints per monitor. The whole set expires after
//! the configured TTL (30 days by default) and the expiry is refreshed on
//! every insert, so active monitors keep their history.
//!
//! `record` must only be called once a generation task for the content is
//! on the queue. Enqueue-then-record can produce an occasional duplicate
//! after a crash; the other order can silently lose content.

use std::time::Duration;

use crate::metrics;
use crate::store::{KeySpace, ResilientStore, StoreResult};

/// Default lifetime of a monitor's fingerprint set
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Per-monitor fingerprint sets
#[derive(Clone)]
pub struct DedupCache {
    store: ResilientStore,
    keys: KeySpace,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            ttl: DEFAULT_DEDUP_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Has this fingerprint been recorded for the monitor
    pub async fn seen(&self, monitor_id: &str, fingerprint: &str) -> StoreResult<bool> {
        let seen = self
            .store
            .set_contains(&self.keys.dedup(monitor_id), fingerprint)
            .await?;
        metrics::record_dedup_lookup(seen);
        Ok(seen)
    }

    /// Record a fingerprint and refresh the set's expiry
    pub async fn record(&self, monitor_id: &str, fingerprint: &str) -> StoreResult<()> {
        let key = self.keys.dedup(monitor_id);
        let added = self.store.set_add(&key, fingerprint).await?;
        self.store.expire(&key, self.ttl).await?;

        tracing::debug!(monitor_id, fingerprint, added, "Fingerprint recorded");
        Ok(())
    }

    /// Forget one fingerprint so the content can be discovered again
    pub async fn invalidate(&self, monitor_id: &str, fingerprint: &str) -> StoreResult<bool> {
        self.store
            .set_remove(&self.keys.dedup(monitor_id), fingerprint)
            .await
    }

    /// Drop a monitor's whole history
    pub async fn clear(&self, monitor_id: &str) -> StoreResult<()> {
        self.store.delete(&self.keys.dedup(monitor_id)).await
    }
}
