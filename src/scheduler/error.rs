//! Error types for the scheduler module

use std::fmt;

use crate::store::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Only publish tasks can be placed in the delayed index
    NotPublishTask {
        kind: String,
    },

    /// Store call failed
    Store(StoreError),

    /// Serialization/deserialization error
    SerializationError {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPublishTask { kind } => {
                write!(f, "Task '{}' cannot be delayed; only publish tasks can", kind)
            }
            Self::Store(err) => write!(f, "Delayed index error: {}", err),
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl SchedulerError {
    pub fn not_publish_task(kind: impl Into<String>) -> Self {
        Self::NotPublishTask { kind: kind.into() }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
