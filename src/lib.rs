//! recast - task-queue orchestration for multi-platform content publishing
//!
//! A worker that discovers new source content, has it rewritten per
//! platform, and publishes the rewrites on a schedule, coordinating
//! everything through a shared key/structure store.
//!
//! # Architecture
//!
//! ```text
//!  monitors ──▶ [discovery queue] ──▶ dedup ──▶ [generation queue]
//!                                                     │
//!                                     spread scheduler + quota
//!                                                     │
//!            [delayed index] ──promote_due──▶ [publish queue] ──▶ platforms
//! ```
//!
//! The library is organized into several modules:
//!
//! - [`config`] - configuration from TOML and `RECAST_*` environment variables
//! - [`store`] - coordination store interface, Redis and in-memory backends, retry
//! - [`queue`] - typed tasks and the three stage queues
//! - [`dedup`] - per-monitor seen-content sets
//! - [`quota`] - per-user daily publish counters
//! - [`scheduler`] - spread scheduling, delayed publishes, recurring jobs
//! - [`collaborators`] - discovery, generation, publishing and system-of-record clients
//! - [`pipeline`] - the per-queue task handlers
//! - [`worker`] - the multi-queue worker runtime
//! - [`control`] - operator control plane and HTTP API
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use recast::collaborators::{ApiClient, Collaborators};
//! use recast::config::Config;
//! use recast::store::RedisStore;
//! use recast::worker::MultiQueueWorker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let store = Arc::new(RedisStore::connect(&config.store).await?);
//!     let client = Arc::new(ApiClient::new(&config.api)?);
//!     let worker = MultiQueueWorker::from_config(&config, store, Collaborators::from_api(client));
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod control;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod quota;
pub mod scheduler;
pub mod store;
pub mod utils;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collaborators::Collaborators;
    pub use crate::config::Config;
    pub use crate::control::ControlPlane;
    pub use crate::error::{Error, ErrorCategory, RecastErrorTrait, Result};
    pub use crate::models::{GeneratedPost, Platform, Post, PostStatus, UserSettings};
    pub use crate::queue::{QueueName, Task, TaskPayload};
    pub use crate::store::{CoordinationStore, KeySpace, ResilientStore};
    pub use crate::worker::MultiQueueWorker;
}

pub use models::{GeneratedPost, Platform, Post, PostStatus};
