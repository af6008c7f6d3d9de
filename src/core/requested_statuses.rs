//! Status lookups a front end is waiting on

use std::sync::Arc;
use std::time::Duration;

use super::request_queue::{Priority, StatusRequestQueue};
use crate::data::{DatabaseError, StatusRequestStore, WatchedRepository};
use crate::util::repo_path;

/// Turns unanswered lookups into immediate, high-priority computations
pub struct RequestedStatuses {
    requests: StatusRequestStore,
    queue: Arc<StatusRequestQueue>,
}

impl RequestedStatuses {
    pub fn new(requests: StatusRequestStore, queue: Arc<StatusRequestQueue>) -> Self {
        Self { requests, queue }
    }

    /// Queue every requested path that still has no status; returns how many.
    ///
    /// Requests stay until a status is stored for them, so a computation that
    /// fails is tried again on a later pass. Paths gone from disk are dropped.
    pub fn queue_unanswered(&self, repo: &WatchedRepository) -> Result<usize, DatabaseError> {
        self.requests.clear_answered(repo.uuid)?;

        let mut queued = 0;
        for path in self.requests.unanswered(repo.uuid)? {
            if std::fs::symlink_metadata(repo_path::absolute_path(&repo.path, &path)).is_err() {
                tracing::debug!(repo = %repo.uuid, path = %path, "Requested path does not exist");
                self.requests.remove(repo.uuid, &path)?;
                continue;
            }
            if self.queue.is_queued(repo.uuid, &path) {
                continue;
            }
            self.queue
                .enqueue(&path, repo, Duration::ZERO, true, true, Priority::High);
            queued += 1;
        }
        if queued > 0 {
            tracing::debug!(repo = %repo.uuid, queued, "Queued requested statuses");
        }
        Ok(queued)
    }
}
