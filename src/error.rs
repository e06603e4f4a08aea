//! Unified error handling for the recast crate
//!
//! Each subsystem owns its error enum; [`Error`] wraps them all so callers
//! crossing module boundaries can use one type.
//!
//! # Architecture
//!
//! - [`RecastErrorTrait`] - common interface implemented by every error type
//! - [`ErrorCategory`] - how the worker reacts to a class of failure
//! - [`Error`] - unified error enum
//!
//! # Categories
//!
//! | Category | Reaction |
//! |----------|----------|
//! | `TransientInfrastructure` | retry with bounded backoff, then restart the loop |
//! | `NoWork` | not an error, continue |
//! | `Collaborator` | fail the task, record activity, continue |
//! | `Validation` | drop the task, never retry |
//! | `Eligibility` | skip the task, leave the post's status alone |
//! | `Configuration` | refuse to start |
//! | `Internal` | log and stop the affected unit |

use std::io;
use thiserror::Error;

pub use crate::collaborators::CollaboratorError;
pub use crate::config::ConfigError;
pub use crate::pipeline::PipelineError;
pub use crate::queue::{QueueError, TaskError};
pub use crate::scheduler::SchedulerError;
pub use crate::store::StoreError;
pub use crate::worker::WorkerError;

/// Common interface for all recast error types
pub trait RecastErrorTrait: std::error::Error {
    /// Retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Classification of failures by how they are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store temporarily unreachable
    TransientInfrastructure,
    /// Empty poll or timed-out read
    NoWork,
    /// Generation, publishing or system-of-record call failed
    Collaborator,
    /// Malformed or incomplete task
    Validation,
    /// Platform disabled, account missing, daily limit reached
    Eligibility,
    Configuration,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::NoWork => "no_work",
            Self::Collaborator => "collaborator",
            Self::Validation => "validation",
            Self::Eligibility => "eligibility",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Subsystem classification
// ============================================================================

impl RecastErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        self.is_transient() || self.is_timeout()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout => ErrorCategory::NoWork,
            Self::Command(_) => ErrorCategory::Internal,
            _ => ErrorCategory::TransientInfrastructure,
        }
    }
}

impl RecastErrorTrait for TaskError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

impl RecastErrorTrait for QueueError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Task(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Task(e) => e.category(),
        }
    }
}

impl RecastErrorTrait for SchedulerError {
    fn is_recoverable(&self) -> bool {
        SchedulerError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::NotPublishTask { .. } | Self::SerializationError { .. } => ErrorCategory::Validation,
        }
    }
}

impl RecastErrorTrait for CollaboratorError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Collaborator
    }
}

impl RecastErrorTrait for PipelineError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Queue(e) => e.is_recoverable(),
            Self::Scheduler(e) => RecastErrorTrait::is_recoverable(e),
            Self::Collaborator(e) => e.is_recoverable(),
            Self::Task(_) | Self::InvalidTask { .. } | Self::Panicked(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Queue(e) => e.category(),
            Self::Task(e) => e.category(),
            Self::Scheduler(e) => e.category(),
            Self::Collaborator(e) => e.category(),
            Self::InvalidTask { .. } => ErrorCategory::Validation,
            Self::Panicked(_) => ErrorCategory::Internal,
        }
    }
}

impl RecastErrorTrait for WorkerError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::UnknownAction(_) => ErrorCategory::Validation,
            Self::RestartsExhausted { .. } | Self::Panicked(_) => ErrorCategory::Internal,
        }
    }
}

impl RecastErrorTrait for ConfigError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

// ============================================================================
// Unified error
// ============================================================================

/// Unified error type for the recast crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RecastErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Task(e) => e.is_recoverable(),
            Self::Queue(e) => e.is_recoverable(),
            Self::Scheduler(e) => RecastErrorTrait::is_recoverable(e),
            Self::Collaborator(e) => e.is_recoverable(),
            Self::Pipeline(e) => e.is_recoverable(),
            Self::Worker(e) => e.is_recoverable(),
            Self::Config(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) | Self::Toml(_) | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Task(e) => e.category(),
            Self::Queue(e) => e.category(),
            Self::Scheduler(e) => e.category(),
            Self::Collaborator(e) => e.category(),
            Self::Pipeline(e) => e.category(),
            Self::Worker(e) => e.category(),
            Self::Config(e) => e.category(),
            Self::Io(_) => ErrorCategory::TransientInfrastructure,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Toml(_) => ErrorCategory::Configuration,
            Self::Other { .. } => ErrorCategory::Internal,
        }
    }
}

impl Error {
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
