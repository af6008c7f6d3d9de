//! Opportunistic rescans of what the user is looking at

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::request_queue::{Priority, StatusRequestQueue};
use crate::data::{DatabaseError, StatusStore, VisibleFolderStore, WatchedRepository};
use crate::util::repo_path;

/// Folders currently shown in a file browser, relative to one repository
#[derive(Debug, Clone, Default)]
pub struct VisibleFolders {
    folders: HashSet<String>,
}

impl VisibleFolders {
    pub fn new(folders: HashSet<String>) -> Self {
        Self { folders }
    }

    /// A path is visible when it, or the folder containing it, is shown
    pub fn is_visible(&self, path: &str) -> bool {
        self.folders.contains(path)
            || repo_path::parent(path).is_some_and(|parent| self.folders.contains(&parent))
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

pub struct VisibleRescanner {
    store: Arc<dyn StatusStore>,
    visible: VisibleFolderStore,
    queue: Arc<StatusRequestQueue>,
    staleness: Duration,
}

impl VisibleRescanner {
    pub fn new(
        store: Arc<dyn StatusStore>,
        visible: VisibleFolderStore,
        queue: Arc<StatusRequestQueue>,
        staleness: Duration,
    ) -> Self {
        Self {
            store,
            visible,
            queue,
            staleness,
        }
    }

    /// Queue low-priority refreshes for stale visible paths; returns how many
    pub fn rescan(&self, repo: &WatchedRepository) -> Result<usize, DatabaseError> {
        let visible = VisibleFolders::new(self.visible.list(repo.uuid)?);
        if visible.is_empty() {
            return Ok(0);
        }

        let mut queued = 0;
        for path in self.store.list_staler_than(repo.uuid, self.staleness)? {
            if visible.is_visible(&path) && !self.queue.is_queued(repo.uuid, &path) {
                self.queue
                    .enqueue(&path, repo, self.staleness, true, true, Priority::Low);
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::debug!(repo = %repo.uuid, queued, "Queued visible rescans");
        }
        Ok(queued)
    }
}
