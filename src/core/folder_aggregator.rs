//! Bottom-up directory completion
//!
//! A directory is complete once every tracked child on disk has a resolved
//! record. Completion folds the children into the directory's record and
//! flags the parent, so status climbs one level per pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use super::request_queue::{Priority, StatusRequestQueue};
use crate::data::{
    DatabaseError, EnoughCopies, PresentStatus, StatusRecord, StatusStore, WatchedRepository,
};
use crate::git::{AnnexQueries, GitError};
use crate::util::repo_path;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Folded status of a directory's tracked children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldedStatus {
    pub present: PresentStatus,
    pub enough_copies: EnoughCopies,
    pub number_of_copies: Option<u32>,
}

/// Fold resolved children. An empty set folds to present with enough copies.
pub fn fold_children<'a>(children: impl IntoIterator<Item = &'a StatusRecord>) -> FoldedStatus {
    let mut present: Option<PresentStatus> = None;
    let mut enough = EnoughCopies::Enough;
    let mut copies: Option<u32> = None;

    for child in children {
        if let Some(p) = child.present {
            present = Some(present.map_or(p, |acc| acc.and(p)));
        }
        if let Some(e) = child.enough_copies {
            enough = enough.and(e);
        }
        if let Some(n) = child.number_of_copies {
            copies = Some(copies.map_or(n, |acc| acc.min(n)));
        }
    }

    FoldedStatus {
        present: present.unwrap_or(PresentStatus::Present),
        enough_copies: enough,
        number_of_copies: copies,
    }
}

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    /// Directories written complete
    pub completed: Vec<String>,
    /// Directories left incomplete
    pub deferred: Vec<String>,
    /// Directories removed because they vanished from disk
    pub removed: Vec<String>,
    /// Backfill requests queued for children without a record
    pub requested: usize,
}

pub struct FolderAggregator {
    queries: AnnexQueries,
    store: Arc<dyn StatusStore>,
    queue: Arc<StatusRequestQueue>,
    backfill_staleness: Duration,
}

impl FolderAggregator {
    pub fn new(
        queries: AnnexQueries,
        store: Arc<dyn StatusStore>,
        queue: Arc<StatusRequestQueue>,
        backfill_staleness: Duration,
    ) -> Self {
        Self {
            queries,
            store,
            queue,
            backfill_staleness,
        }
    }

    /// Reconsider every incomplete directory of `repo`, deepest first.
    ///
    /// A directory flagged during this pass by a completing child waits for
    /// the next pass.
    pub fn run_pass(&self, repo: &WatchedRepository) -> Result<AggregationReport, AggregatorError> {
        let mut dirs = self.store.list_incomplete_or_flagged(repo.uuid)?;
        repo_path::sort_deepest_first(&mut dirs);

        let mut report = AggregationReport::default();
        let mut flagged_this_pass: HashSet<String> = HashSet::new();

        for dir in dirs {
            if flagged_this_pass.contains(&dir) {
                report.deferred.push(dir);
                continue;
            }

            let absolute = repo_path::absolute_path(&repo.path, &dir);
            if !absolute.is_dir() && repo_path::is_root(&dir) {
                // unmounted volume; keep what we know
                tracing::debug!(repo = %repo.uuid, "Repository root not accessible");
                report.deferred.push(dir);
                continue;
            }
            if !absolute.is_dir() {
                self.store.remove(repo.uuid, &dir)?;
                if let Some(parent) = repo_path::parent(&dir) {
                    self.store.invalidate(repo.uuid, &parent)?;
                    flagged_this_pass.insert(parent);
                }
                report.removed.push(dir);
                continue;
            }

            let on_disk = match self.queries.immediate_children_not_ignored(&repo.path, &dir) {
                Ok(children) => children,
                Err(e) => {
                    tracing::warn!(repo = %repo.uuid, path = %dir, error = %e, "Failed to list children");
                    report.deferred.push(dir);
                    continue;
                }
            };
            let on_disk_paths: HashSet<&str> = on_disk.iter().map(|c| c.path.as_str()).collect();

            let mut records: HashMap<String, StatusRecord> = HashMap::new();
            for record in self.store.children_of(repo.uuid, &dir)? {
                if on_disk_paths.contains(record.path.as_str()) {
                    records.insert(record.path.clone(), record);
                } else {
                    self.store.remove(repo.uuid, &record.path)?;
                }
            }

            let missing: Vec<&str> = on_disk
                .iter()
                .map(|c| c.path.as_str())
                .filter(|p| !records.contains_key(*p))
                .collect();
            if !missing.is_empty() {
                for path in missing {
                    if !self.queue.is_queued(repo.uuid, path) {
                        self.queue.enqueue(
                            path,
                            repo,
                            self.backfill_staleness,
                            true,
                            false,
                            Priority::Low,
                        );
                        report.requested += 1;
                    }
                }
                report.deferred.push(dir);
                continue;
            }

            let tracked: Vec<&StatusRecord> = records.values().filter(|r| r.is_tracked).collect();
            if tracked.iter().any(|r| !r.is_resolved()) {
                report.deferred.push(dir);
                continue;
            }

            let folded = fold_children(tracked.iter().copied());
            let mut record = self
                .store
                .get(repo.uuid, &dir)?
                .unwrap_or_else(|| StatusRecord::directory_placeholder(dir.clone()));
            record.is_dir = true;
            record.is_tracked = true;
            record.present = Some(folded.present);
            record.enough_copies = Some(folded.enough_copies);
            record.number_of_copies = folded.number_of_copies;
            record.content_key = None;
            record.needs_update = false;
            record.last_modified = Utc::now();
            self.store.put(repo.uuid, &record)?;

            if let Some(parent) = repo_path::parent(&dir) {
                self.store.invalidate(repo.uuid, &parent)?;
                flagged_this_pass.insert(parent);
            }
            tracing::debug!(
                repo = %repo.uuid,
                path = %dir,
                present = ?folded.present,
                enough = ?folded.enough_copies,
                "Directory complete"
            );
            report.completed.push(dir);
        }

        Ok(report)
    }
}
