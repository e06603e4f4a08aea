//! Post status updates against the system of record
//!
//! Every stage moves a post one step forward or to a failure state. The
//! transition is checked against the record's current status, so several
//! tasks sharing one record (one per platform) cannot move it out of a
//! terminal state. When the status cannot be read, the caller's expected
//! status stands in. A failed update is logged and the task carries on.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collaborators::SystemOfRecord;
use crate::models::PostStatus;

#[derive(Clone)]
pub struct PostTracker {
    records: Arc<dyn SystemOfRecord>,
}

impl PostTracker {
    pub fn new(records: Arc<dyn SystemOfRecord>) -> Self {
        Self { records }
    }

    /// Move a post expected in `from` to `to`; returns whether the update
    /// was written
    pub async fn advance(&self, post_id: &str, from: PostStatus, to: PostStatus, details: Value) -> bool {
        let current = match self.records.get_post(post_id).await {
            Ok(Some(post)) => post.status,
            Ok(None) => from,
            Err(e) => {
                warn!(post_id, expected = %from, error = %e, "Could not read post status, assuming expected");
                from
            }
        };

        if current == to {
            debug!(post_id, status = %to, "Post already in target status");
            return false;
        }
        if !current.can_transition_to(to) {
            warn!(post_id, current = %current, expected = %from, to = %to, "Refusing invalid post transition");
            return false;
        }

        match self.records.update_post_status(post_id, to, details).await {
            Ok(()) => {
                debug!(post_id, from = %current, to = %to, "Post status updated");
                true
            }
            Err(e) => {
                warn!(post_id, to = %to, error = %e, "Failed to update post status");
                false
            }
        }
    }
}
