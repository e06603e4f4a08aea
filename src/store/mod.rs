//! Coordination store
//!
//! Everything the worker shares between its loops lives in a key/structure
//! store. This module defines the narrow interface the rest of the crate
//! talks to, plus the backends behind it.
//!
//! # Primitives
//!
//! ```text
//! ┌──────────────┐   push / blocking_pop / list_len / list_trim
//! │ FIFO lists   │   (stage queues, activity log)
//! ├──────────────┤
//! │ Sorted sets  │   sorted_add / sorted_range_by_score / promote_member
//! │              │   (delayed publish index, score = unix seconds)
//! ├──────────────┤
//! │ Sets         │   set_add / set_contains / set_remove (dedup)
//! ├──────────────┤
//! │ Hashes       │   hash_set / hash_get_all (worker stats)
//! ├──────────────┤
//! │ Scalars      │   get / set / take / incr / expire / delete
//! └──────────────┘   (quota counters, heartbeat, control signal, caches)
//! ```
//!
//! # Backends
//!
//! - [`RedisStore`] - production backend over a `deadpool-redis` pool
//! - [`MemoryStore`] - in-process backend for tests and local runs
//!
//! Callers never use a backend directly; they go through [`ResilientStore`],
//! which applies bounded retry to every call.

pub mod keys;
pub mod memory;
pub mod redis;
pub mod retry;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use keys::KeySpace;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use retry::{Backoff, ResilientStore, StoreRetryPolicy};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a coordination store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped
    #[error("Store connection error: {0}")]
    Connection(String),

    /// No connection could be checked out of the pool
    #[error("Store pool error: {0}")]
    Pool(String),

    /// The call timed out without data; not a fault
    #[error("Store operation timed out")]
    Timeout,

    /// The store rejected the command (wrong type, script error, ...)
    #[error("Store command error: {0}")]
    Command(String),
}

impl StoreError {
    /// Connectivity problems that are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Pool(_))
    }

    /// Timeout-class error, read as "no result"
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Narrow interface over the shared coordination store
///
/// All list operations push on the left and pop on the right, so a list
/// behaves as a FIFO queue.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Lightweight liveness probe
    async fn ping(&self) -> StoreResult<()>;

    /// Append a value to the tail of a FIFO list
    async fn push(&self, list: &str, value: &str) -> StoreResult<()>;

    /// Put a value back at the head of a FIFO list, next in line to pop
    async fn push_oldest(&self, list: &str, value: &str) -> StoreResult<()>;

    /// Pop the oldest value, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when the timeout elapses with the list empty.
    async fn blocking_pop(&self, list: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Number of values in a list
    async fn list_len(&self, list: &str) -> StoreResult<usize>;

    /// Keep only the newest `keep` values of a list
    async fn list_trim(&self, list: &str, keep: usize) -> StoreResult<()>;

    /// Newest-first slice of a list, `limit` values at most
    async fn list_recent(&self, list: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// Insert or update a member of a sorted set
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// Members with score <= `max`, ascending by score
    async fn sorted_range_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>>;

    /// Remove a member; returns whether it was present
    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Number of members in a sorted set
    async fn sorted_len(&self, key: &str) -> StoreResult<usize>;

    /// Atomically remove `member` from the sorted set and push it onto `list`
    ///
    /// Returns `false` (and pushes nothing) when the member was already gone.
    async fn promote_member(&self, key: &str, member: &str, list: &str) -> StoreResult<bool>;

    /// Add a member to a set; returns whether it was newly added
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Set membership test
    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set; returns whether it was present
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Set several hash fields at once
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()>;

    /// Read a whole hash
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Read a scalar value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a scalar value, optionally with an expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Read and delete a scalar value in one step
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically increment an integer value (missing counts as 0)
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set the expiry of a key
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete a key of any type
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
