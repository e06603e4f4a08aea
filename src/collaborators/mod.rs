//! External collaborators
//!
//! The pipeline calls out to four services it does not implement:
//!
//! - [`ContentDiscovery`] scans monitors for new content
//! - [`ContentGenerator`] rewrites a post per platform
//! - [`PlatformPublisher`] submits a generated post to a platform
//! - [`SystemOfRecord`] owns monitors, posts, settings and accounts
//!
//! Every call may fail; callers decide per call whether to fall back to a
//! default, skip, or fail the task. [`ApiClient`] implements all four over
//! a REST endpoint.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    Account, DiscoveredContent, GeneratedPost, Monitor, Platform, Post, PostStatus,
    PublishOutcome, UserSettings,
};

pub use http::ApiClient;

/// Result type for collaborator calls
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Collaborator call failures
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Service unreachable or timed out
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    /// Service answered with an error status
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Service refused the request for a reason retrying cannot fix
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    /// Response could not be understood
    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            reason: reason.into(),
        }
    }

    pub fn rejected(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            reason: reason.into(),
        }
    }

    /// Worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rejected { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

/// Finds new source content
#[async_trait]
pub trait ContentDiscovery: Send + Sync {
    async fn scan_monitor(&self, monitor: &Monitor) -> CollabResult<Vec<DiscoveredContent>>;

    /// Scan every active monitor of a user, keyed by monitor id
    async fn scan_all_monitors(
        &self,
        user_id: &str,
    ) -> CollabResult<HashMap<String, Vec<DiscoveredContent>>>;
}

/// Rewrites a source post into platform-specific posts
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, post: &Post, settings: &UserSettings)
        -> CollabResult<Vec<GeneratedPost>>;
}

/// Submits a generated post to its platform
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    async fn publish(
        &self,
        post: &GeneratedPost,
        account: &Account,
        idempotency_key: &str,
    ) -> CollabResult<PublishOutcome>;
}

/// Owner of monitors, posts, user settings and connected accounts
#[async_trait]
pub trait SystemOfRecord: Send + Sync {
    async fn get_monitor(&self, monitor_id: &str) -> CollabResult<Option<Monitor>>;

    async fn active_monitors(&self, user_id: &str) -> CollabResult<Vec<Monitor>>;

    /// Users owning at least one active monitor
    async fn users_with_active_monitors(&self) -> CollabResult<Vec<String>>;

    async fn mark_monitor_checked(&self, monitor_id: &str, at: DateTime<Utc>)
        -> CollabResult<()>;

    async fn get_post(&self, post_id: &str) -> CollabResult<Option<Post>>;

    async fn posts_with_status(
        &self,
        user_id: &str,
        status: PostStatus,
        limit: usize,
    ) -> CollabResult<Vec<Post>>;

    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        details: serde_json::Value,
    ) -> CollabResult<()>;

    async fn user_settings(&self, user_id: &str) -> CollabResult<Option<UserSettings>>;

    /// Connected accounts, optionally for one platform
    async fn connected_accounts(
        &self,
        user_id: &str,
        platform: Option<Platform>,
    ) -> CollabResult<Vec<Account>>;
}

/// The four collaborators the pipeline is wired with
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn ContentDiscovery>,
    pub generator: Arc<dyn ContentGenerator>,
    pub publisher: Arc<dyn PlatformPublisher>,
    pub records: Arc<dyn SystemOfRecord>,
}

impl Collaborators {
    /// All four backed by one REST client
    pub fn from_api(client: Arc<ApiClient>) -> Self {
        Self {
            discovery: client.clone(),
            generator: client.clone(),
            publisher: client.clone(),
            records: client,
        }
    }
}
