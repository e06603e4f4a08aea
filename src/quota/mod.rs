//! Per-user daily publish quota
//!
//! One integer counter per `(user, calendar day)`, keyed by the UTC date.
//! A new day means a new key, so the count resets at rollover and is never
//! decremented. Each counter expires 25 hours after its first write.
//!
//! The check and the increment are separate calls: two publishes racing on
//! the last slot can both pass the check. The overshoot is at most the
//! number of concurrent publish handlers and is logged when it happens.

use chrono::{NaiveDate, Utc};
use std::time::Duration;

use crate::store::{KeySpace, ResilientStore, StoreError, StoreResult};

/// Counter lifetime, measured from first write
pub const DEFAULT_QUOTA_TTL: Duration = Duration::from_secs(25 * 60 * 60);

/// Pseudo-user for system-initiated publishes, never limited
pub const SYSTEM_USER: &str = "system";

/// Daily publish counters
#[derive(Clone)]
pub struct QuotaLedger {
    store: ResilientStore,
    keys: KeySpace,
    ttl: Duration,
}

impl QuotaLedger {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            ttl: DEFAULT_QUOTA_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Successful publishes recorded for the user on `day`
    pub async fn count_on(&self, user_id: &str, day: NaiveDate) -> StoreResult<i64> {
        let raw = self.store.get(&self.keys.quota(user_id, day)).await?;
        Ok(match raw {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(user_id, value = %value, "Unreadable quota counter, treating as 0");
                0
            }),
            None => 0,
        })
    }

    pub async fn count(&self, user_id: &str) -> StoreResult<i64> {
        self.count_on(user_id, Self::today()).await
    }

    /// May the user publish once more on `day`; `daily_limit <= 0` is unlimited
    pub async fn can_publish_on(
        &self,
        user_id: &str,
        daily_limit: i64,
        day: NaiveDate,
    ) -> StoreResult<bool> {
        if daily_limit <= 0 || user_id.is_empty() || user_id == SYSTEM_USER {
            return Ok(true);
        }
        let count = self.count_on(user_id, day).await?;
        let allowed = count < daily_limit;
        if !allowed {
            tracing::info!(user_id, count, daily_limit, "Daily publish limit reached");
        }
        Ok(allowed)
    }

    pub async fn can_publish(&self, user_id: &str, daily_limit: i64) -> StoreResult<bool> {
        self.can_publish_on(user_id, daily_limit, Self::today()).await
    }

    /// Publishes left today; `None` when unlimited
    pub async fn remaining(&self, user_id: &str, daily_limit: i64) -> StoreResult<Option<i64>> {
        if daily_limit <= 0 {
            return Ok(None);
        }
        let count = self.count(user_id).await?;
        Ok(Some((daily_limit - count).max(0)))
    }

    /// Count one successful publish on `day`; returns the new count
    ///
    /// Call only after the platform confirmed the publish.
    pub async fn increment_on(&self, user_id: &str, day: NaiveDate) -> StoreResult<i64> {
        let key = self.keys.quota(user_id, day);
        let count = match self.store.incr(&key).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                tracing::warn!(user_id, "Quota increment timed out, count unknown");
                return self.count_on(user_id, day).await;
            }
            Err(StoreError::Command(reason)) => {
                tracing::warn!(user_id, reason = %reason, "Quota counter corrupt, resetting");
                self.store.set(&key, "1", Some(self.ttl)).await?;
                return Ok(1);
            }
            Err(e) => return Err(e),
        };

        if count == 1 {
            self.store.expire(&key, self.ttl).await?;
        }
        tracing::debug!(user_id, count, "Publish counted");
        Ok(count)
    }

    pub async fn increment(&self, user_id: &str) -> StoreResult<i64> {
        self.increment_on(user_id, Self::today()).await
    }
}
