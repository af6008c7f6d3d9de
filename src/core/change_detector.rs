//! Commit-delta change detection
//!
//! Each repository has a cursor per history line. A pass reads both heads,
//! collects the paths touched since the cursors, advances the cursors and only
//! then hands the paths back for scheduling. Replaying a pass after a crash
//! can only recompute more, never less.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::data::{DatabaseError, StatusStore, WatchedRepository};
use crate::git::{AnnexQueries, GitError, HistoryLine};
use crate::util::repo_path;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Last handled commit on each history line; `None` until the line has a
/// readable head
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitCursor {
    pub primary: Option<String>,
    pub metadata: Option<String>,
}

impl CommitCursor {
    fn get(&self, line: HistoryLine) -> Option<&String> {
        match line {
            HistoryLine::Primary => self.primary.as_ref(),
            HistoryLine::Metadata => self.metadata.as_ref(),
        }
    }

    fn set(&mut self, line: HistoryLine, commit: String) {
        match line {
            HistoryLine::Primary => self.primary = Some(commit),
            HistoryLine::Metadata => self.metadata = Some(commit),
        }
    }
}

pub struct ChangeDetector {
    queries: AnnexQueries,
    store: Arc<dyn StatusStore>,
    cursors: Mutex<HashMap<Uuid, CommitCursor>>,
}

impl ChangeDetector {
    pub fn new(queries: AnnexQueries, store: Arc<dyn StatusStore>) -> Self {
        Self {
            queries,
            store,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// The repository's cursor, created from the current heads on first use
    pub fn commit_cursor_for(&self, repo: &WatchedRepository) -> CommitCursor {
        if let Some(cursor) = self.cursors.lock().get(&repo.uuid) {
            return cursor.clone();
        }

        let mut cursor = CommitCursor::default();
        for line in [HistoryLine::Primary, HistoryLine::Metadata] {
            if let Some(head) = self.read_head(repo, line) {
                cursor.set(line, head);
            }
        }
        self.cursors
            .lock()
            .entry(repo.uuid)
            .or_insert(cursor)
            .clone()
    }

    fn read_head(&self, repo: &WatchedRepository, line: HistoryLine) -> Option<String> {
        match self.queries.head_commit(&repo.path, line) {
            Ok(head) => Some(head),
            Err(e) => {
                tracing::debug!(
                    repo = %repo.uuid,
                    line = line.revision(),
                    error = %e,
                    "Head not readable"
                );
                None
            }
        }
    }

    /// Paths changed since the last pass.
    ///
    /// The first call for a repository only records the heads. A line whose
    /// head cannot be read because it has no commits is skipped; any other
    /// head failure aborts the pass with the cursor untouched. When the head is
    /// readable but the range since the cursor is not, the cursor jumps to the
    /// head and the repository root is flagged for a recheck.
    pub fn advance_and_diff(
        &self,
        repo: &WatchedRepository,
    ) -> Result<BTreeSet<String>, DetectorError> {
        let existing = self.cursors.lock().get(&repo.uuid).cloned();
        let Some(mut cursor) = existing else {
            self.commit_cursor_for(repo);
            return Ok(BTreeSet::new());
        };

        let mut changed = BTreeSet::new();
        for line in [HistoryLine::Primary, HistoryLine::Metadata] {
            let head = match self.queries.head_commit(&repo.path, line) {
                Ok(head) => head,
                Err(GitError::NoCommits(rev)) => {
                    tracing::debug!(repo = %repo.uuid, line = %rev, "No commits yet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match cursor.get(line) {
                None => {}
                Some(from) if *from == head => continue,
                Some(from) => match self.diff_line(repo, line, from, &head) {
                    Ok(paths) => changed.extend(paths),
                    Err(DetectorError::Git(e)) => {
                        // e.g. the old commit was rewritten away; start over from here
                        tracing::warn!(
                            repo = %repo.uuid,
                            line = line.revision(),
                            from = %from,
                            to = %head,
                            error = %e,
                            "History range not readable, rechecking from the root"
                        );
                        self.store.invalidate(repo.uuid, repo_path::ROOT)?;
                    }
                    Err(e) => return Err(e),
                },
            }
            cursor.set(line, head);
        }

        self.cursors.lock().insert(repo.uuid, cursor);
        if !changed.is_empty() {
            tracing::debug!(repo = %repo.uuid, count = changed.len(), "Detected changed paths");
        }
        Ok(changed)
    }

    fn diff_line(
        &self,
        repo: &WatchedRepository,
        line: HistoryLine,
        from: &str,
        to: &str,
    ) -> Result<BTreeSet<String>, DetectorError> {
        match line {
            HistoryLine::Primary => Ok(self.queries.paths_changed_since(&repo.path, from, to)?),
            HistoryLine::Metadata => self.paths_for_location_changes(repo, from, to),
        }
    }

    fn paths_for_location_changes(
        &self,
        repo: &WatchedRepository,
        from: &str,
        to: &str,
    ) -> Result<BTreeSet<String>, DetectorError> {
        let keys = self.queries.keys_changed_since(&repo.path, from, to)?;
        if keys.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut paths: BTreeSet<String> = self
            .store
            .resolve_paths_for_content_keys(repo.uuid, &keys)?
            .into_iter()
            .collect();
        if paths.len() < keys.len() {
            // a key with no known path: something was added or moved behind our back
            tracing::debug!(
                repo = %repo.uuid,
                keys = keys.len(),
                resolved = paths.len(),
                "Unresolved content keys, rechecking untracked paths"
            );
            paths.extend(self.store.list_untracked_paths(repo.uuid)?);
        }
        Ok(paths)
    }

    /// Forget cursors of repositories that are no longer watched
    pub fn retain(&self, watched: &std::collections::HashSet<Uuid>) {
        self.cursors.lock().retain(|uuid, _| watched.contains(uuid));
    }
}
