//! Operator-visible activity log
//!
//! A capped list in the store, newest first. Writing to it must never fail a
//! task, so errors are logged and swallowed.

use tracing::warn;

use crate::models::{ActivityKind, ActivityRecord};
use crate::store::{KeySpace, ResilientStore, StoreResult};

pub const DEFAULT_ACTIVITY_LOG_LEN: usize = 100;

#[derive(Clone)]
pub struct ActivityLog {
    store: ResilientStore,
    keys: KeySpace,
    max_len: usize,
}

impl ActivityLog {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            max_len: DEFAULT_ACTIVITY_LOG_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    pub async fn record(&self, record: ActivityRecord) {
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to serialize activity record");
                return;
            }
        };

        let key = self.keys.activities();
        if let Err(e) = self.store.push(&key, &raw).await {
            warn!(kind = ?record.kind, error = %e, "Failed to write activity record");
            return;
        }
        if let Err(e) = self.store.list_trim(&key, self.max_len).await {
            warn!(error = %e, "Failed to trim activity log");
        }
    }

    /// Shorthand for a record without details
    pub async fn note(&self, kind: ActivityKind, user_id: Option<&str>, message: impl Into<String>) {
        self.record(ActivityRecord::new(kind, user_id, message)).await;
    }

    /// Newest records first; unreadable entries are skipped
    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<ActivityRecord>> {
        let raw = self.store.list_recent(&self.keys.activities(), limit).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    pub async fn trim(&self) -> StoreResult<()> {
        self.store
            .list_trim(&self.keys.activities(), self.max_len)
            .await
    }
}
