//! Time-based scheduling
//!
//! # Overview
//!
//! Three pieces decide *when* things happen:
//!
//! - [`spread`] plans publish times for a batch of generated posts, one per
//!   platform, inside the user's posting window
//! - [`delayed`] holds publish tasks until they are due and promotes them
//!   onto the publish queue
//! - [`periodic`] drives the recurring discovery sweeps, cleanup and stats
//!
//! # Architecture
//!
//! ```text
//!  generation ──▶ SpreadScheduler ──▶ due now? ──yes──▶ [publish queue]
//!                                        │                    ▲
//!                                        no                   │ promote_due
//!                                        ▼                    │
//!                               [delayed index] ──────────────┘
//! ```
//!
//! Promotion runs from the publish consumer on every iteration, so a post
//! never publishes before its time and waits at most one poll interval
//! after it.

pub mod delayed;
pub mod error;
pub mod periodic;
pub mod spread;

pub use delayed::DelayedPublishScheduler;
pub use error::{SchedulerError, SchedulerResult};
pub use periodic::{JobSchedule, PeriodicJobs};
pub use spread::SpreadScheduler;
