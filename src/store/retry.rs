//! Retryable store operations
//!
//! [`ResilientStore`] wraps a [`CoordinationStore`] and applies the same
//! policy to every call:
//!
//! - transient connectivity errors are retried up to a fixed bound, with
//!   a growing delay and a PING probe between attempts
//! - timeout-class errors are read as "no result" and never retried
//! - command errors are returned immediately
//! - exhausting the bound returns the last error to the caller
//!
//! Reads that time out therefore come back as the neutral value of their
//! type (`None`, `0`, `false`, empty). Callers that must tell "nothing to
//! do" from "could not ask" look at the `Err` arm, never at the value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CoordinationStore, StoreError, StoreResult};
use crate::config::RetryConfig;
use crate::metrics;

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt`
    Linear,
    /// `step * 2^(attempt - 1)`
    Exponential,
}

/// Bounded retry policy for store calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub step: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Linear,
        }
    }
}

impl StoreRetryPolicy {
    /// Linear policy applied to ordinary store calls
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            step,
            backoff: Backoff::Linear,
            ..Default::default()
        }
    }

    /// Exponential policy applied to the consumer's blocking pop
    pub fn exponential(max_attempts: u32, step: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            step,
            max_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Policies for ordinary calls and for the blocking pop
    pub fn from_config(config: &RetryConfig) -> (Self, Self) {
        (
            Self::linear(
                config.max_attempts,
                Duration::from_millis(config.linear_step_ms),
            ),
            Self::exponential(
                config.pop_max_attempts,
                Duration::from_millis(config.pop_base_delay_ms),
                Duration::from_millis(config.pop_max_delay_ms),
            ),
        )
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Linear => self.step.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.step.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Coordination store with retry applied to every call
#[derive(Clone)]
pub struct ResilientStore {
    inner: Arc<dyn CoordinationStore>,
    policy: StoreRetryPolicy,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn CoordinationStore>, policy: StoreRetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Same backend, different policy
    pub fn with_policy(&self, policy: StoreRetryPolicy) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy,
        }
    }

    pub fn policy(&self) -> &StoreRetryPolicy {
        &self.policy
    }

    /// Run one store call under the retry policy
    ///
    /// `Ok(None)` means the call timed out without a result.
    pub async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> StoreResult<Option<T>>
    where
        F: Fn(Arc<dyn CoordinationStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f(Arc::clone(&self.inner)).await {
                Ok(value) => return Ok(Some(value)),
                Err(StoreError::Timeout) => {
                    tracing::debug!(op, "Store call timed out, treating as no result");
                    return Ok(None);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store error, retrying"
                    );
                    metrics::record_store_retry(op);
                    tokio::time::sleep(delay).await;

                    if let Err(probe) = self.inner.ping().await {
                        tracing::debug!(op, error = %probe, "Store still unreachable");
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(op, attempts, error = %e, "Store retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn call_or_default<T, F, Fut>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Default,
        F: Fn(Arc<dyn CoordinationStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.call(op, f).await.map(Option::unwrap_or_default)
    }

    /// Writes have no "no result" reading: a timeout may mean the write
    /// never landed, so it is returned as an error
    async fn write<T, F, Fut>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        F: Fn(Arc<dyn CoordinationStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match self.call(op, f).await? {
            Some(value) => Ok(value),
            None => {
                tracing::warn!(op, "Store write timed out, outcome unknown");
                Err(StoreError::Timeout)
            }
        }
    }

    // =========================================================================
    // Lists
    // =========================================================================

    pub async fn push(&self, list: &str, value: &str) -> StoreResult<()> {
        self.write("push", move |s| async move { s.push(list, value).await })
            .await
    }

    pub async fn push_oldest(&self, list: &str, value: &str) -> StoreResult<()> {
        self.write("push_oldest", move |s| async move { s.push_oldest(list, value).await })
            .await
    }

    pub async fn blocking_pop(&self, list: &str, timeout: Duration) -> StoreResult<Option<String>> {
        self.call("blocking_pop", move |s| async move {
            s.blocking_pop(list, timeout).await
        })
        .await
        .map(Option::flatten)
    }

    pub async fn list_len(&self, list: &str) -> StoreResult<usize> {
        self.call_or_default("list_len", move |s| async move { s.list_len(list).await })
            .await
    }

    pub async fn list_trim(&self, list: &str, keep: usize) -> StoreResult<()> {
        self.write("list_trim", move |s| async move { s.list_trim(list, keep).await })
            .await
    }

    pub async fn list_recent(&self, list: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.call_or_default("list_recent", move |s| async move {
            s.list_recent(list, limit).await
        })
        .await
    }

    // =========================================================================
    // Sorted sets
    // =========================================================================

    pub async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.write("sorted_add", move |s| async move {
            s.sorted_add(key, member, score).await
        })
        .await
    }

    pub async fn sorted_range_by_score(
        &self,
        key: &str,
        max: f64,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.call_or_default("sorted_range_by_score", move |s| async move {
            s.sorted_range_by_score(key, max).await
        })
        .await
    }

    pub async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write("sorted_remove", move |s| async move {
            s.sorted_remove(key, member).await
        })
        .await
    }

    pub async fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        self.call_or_default("sorted_len", move |s| async move { s.sorted_len(key).await })
            .await
    }

    pub async fn promote_member(&self, key: &str, member: &str, list: &str) -> StoreResult<bool> {
        self.write("promote_member", move |s| async move {
            s.promote_member(key, member, list).await
        })
        .await
    }

    // =========================================================================
    // Sets and hashes
    // =========================================================================

    pub async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write("set_add", move |s| async move { s.set_add(key, member).await })
            .await
    }

    pub async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.call_or_default("set_contains", move |s| async move {
            s.set_contains(key, member).await
        })
        .await
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write("set_remove", move |s| async move {
            s.set_remove(key, member).await
        })
        .await
    }

    pub async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.write("hash_set", move |s| async move { s.hash_set(key, fields).await })
            .await
    }

    pub async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.call_or_default("hash_get_all", move |s| async move { s.hash_get_all(key).await })
            .await
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    pub async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.call("get", move |s| async move { s.get(key).await })
            .await
            .map(Option::flatten)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.write("set", move |s| async move { s.set(key, value, ttl).await })
            .await
    }

    pub async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.call("take", move |s| async move { s.take(key).await })
            .await
            .map(Option::flatten)
    }

    /// Atomic increment; `Ok(None)` when the call timed out
    pub async fn incr(&self, key: &str) -> StoreResult<Option<i64>> {
        self.call("incr", move |s| async move { s.incr(key).await }).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.write("expire", move |s| async move { s.expire(key, ttl).await })
            .await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.write("delete", move |s| async move { s.delete(key).await })
            .await
    }
}
