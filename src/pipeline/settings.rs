//! Per-user settings with a short-lived store cache
//!
//! Settings come from the system of record and are cached in the
//! coordination store. When the system of record cannot answer, defaults
//! are used with the enabled platforms taken from the user's connected
//! active accounts; a settings outage never stops the pipeline.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::collaborators::SystemOfRecord;
use crate::models::{Platform, UserSettings};
use crate::store::{KeySpace, ResilientStore};

pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct SettingsProvider {
    records: Arc<dyn SystemOfRecord>,
    store: ResilientStore,
    keys: KeySpace,
    cache_ttl: Duration,
}

impl SettingsProvider {
    pub fn new(records: Arc<dyn SystemOfRecord>, store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            records,
            store,
            keys,
            cache_ttl: DEFAULT_SETTINGS_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Settings for a user; always returns something usable
    pub async fn get(&self, user_id: &str) -> UserSettings {
        if let Some(cached) = self.cached(user_id).await {
            return cached.sanitized();
        }

        match self.records.user_settings(user_id).await {
            Ok(Some(mut settings)) => {
                if settings.user_id.is_empty() {
                    settings.user_id = user_id.to_string();
                }
                let settings = settings.sanitized();
                self.store_cache(&settings).await;
                settings
            }
            Ok(None) => {
                debug!(user_id, "No stored settings, using defaults");
                self.fallback(user_id).await
            }
            Err(e) => {
                warn!(user_id, error = %e, "Settings lookup failed, using defaults");
                self.fallback(user_id).await
            }
        }
    }

    /// Drop the cached copy so the next read goes to the system of record
    pub async fn invalidate(&self, user_id: &str) {
        if let Err(e) = self.store.delete(&self.keys.settings(user_id)).await {
            warn!(user_id, error = %e, "Failed to invalidate settings cache");
        }
    }

    async fn cached(&self, user_id: &str) -> Option<UserSettings> {
        let raw = match self.store.get(&self.keys.settings(user_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(user_id, error = %e, "Settings cache unavailable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(user_id, error = %e, "Discarding unreadable cached settings");
                None
            }
        }
    }

    async fn store_cache(&self, settings: &UserSettings) {
        if self.cache_ttl.is_zero() {
            return;
        }
        let Ok(raw) = serde_json::to_string(settings) else {
            return;
        };
        let key = self.keys.settings(&settings.user_id);
        if let Err(e) = self.store.set(&key, &raw, Some(self.cache_ttl)).await {
            warn!(user_id = %settings.user_id, error = %e, "Failed to cache settings");
        }
    }

    async fn fallback(&self, user_id: &str) -> UserSettings {
        let mut settings = UserSettings::defaults_for(user_id);
        match self.records.connected_accounts(user_id, None).await {
            Ok(accounts) => {
                let mut platforms: Vec<Platform> = Vec::new();
                for account in accounts.iter().filter(|a| a.active) {
                    if !platforms.contains(&account.platform) {
                        platforms.push(account.platform);
                    }
                }
                settings.enabled_platforms = platforms;
            }
            Err(e) => {
                warn!(user_id, error = %e, "Account lookup failed, no platforms enabled");
            }
        }
        settings
    }
}
