//! Key layout in the coordination store

use chrono::NaiveDate;

use crate::queue::QueueName;

/// Builds every key the worker reads or writes
///
/// An empty prefix yields the bare key names; a prefix `p` yields `p:name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{name}", self.prefix)
        }
    }

    /// FIFO list for a pipeline stage
    pub fn queue(&self, queue: QueueName) -> String {
        self.key(queue.list_name())
    }

    /// Time-indexed delayed publish collection
    pub fn delayed(&self) -> String {
        self.key("pending_posts_queue")
    }

    /// Per-monitor fingerprint set
    pub fn dedup(&self, monitor_id: &str) -> String {
        self.key(&format!("processed_posts:{monitor_id}"))
    }

    /// Per-user, per-day publish counter
    pub fn quota(&self, user_id: &str, day: NaiveDate) -> String {
        self.key(&format!(
            "user:{user_id}:{}:published_count",
            day.format("%Y-%m-%d")
        ))
    }

    pub fn heartbeat(&self) -> String {
        self.key("worker:heartbeat")
    }

    pub fn stats(&self) -> String {
        self.key("worker:stats")
    }

    pub fn control(&self) -> String {
        self.key("worker:control")
    }

    pub fn activities(&self) -> String {
        self.key("activities")
    }

    /// Time of the last recurring discovery sweep for a user
    pub fn last_sweep(&self, user_id: &str) -> String {
        self.key(&format!("user:{user_id}:last_scheduled_blog_check_time"))
    }

    /// Cached copy of a user's settings
    pub fn settings(&self, user_id: &str) -> String {
        self.key(&format!("user_settings:{user_id}"))
    }
}
