//! Computes the status of a single path and stores it

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::data::{
    DatabaseError, EnoughCopies, PresentStatus, StatusRecord, StatusStore, WatchedRepository,
};
use crate::git::{AnnexQueries, DirectoryInfo, GitError};
use crate::util::repo_path;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// What a computation did to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeOutcome {
    Written(StatusRecord),
    /// Nothing computed; a placeholder may have been stored for a directory
    Skipped { placeholder_written: bool },
    /// The path is gone from disk and its records were removed
    Removed,
}

pub struct StatusComputer {
    queries: AnnexQueries,
    store: Arc<dyn StatusStore>,
}

impl StatusComputer {
    pub fn new(queries: AnnexQueries, store: Arc<dyn StatusStore>) -> Self {
        Self { queries, store }
    }

    pub fn compute(
        &self,
        repo: &WatchedRepository,
        path: &str,
        include_files: bool,
        include_dirs: bool,
    ) -> Result<ComputeOutcome, ComputeError> {
        if !repo.path.is_dir() {
            // unmounted or moved: absence says nothing about the paths inside
            tracing::debug!(
                repo = %repo.uuid,
                root = %repo.path.display(),
                path = %path,
                "Repository root not accessible, skipping"
            );
            return Ok(ComputeOutcome::Skipped {
                placeholder_written: false,
            });
        }

        let absolute = repo_path::absolute_path(&repo.path, path);
        // annexed files are symlinks that dangle while content is absent
        let metadata = match std::fs::symlink_metadata(&absolute) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.remove_vanished(repo, path);
            }
            Err(e) => return Err(GitError::Io(e).into()),
        };

        if metadata.is_dir() {
            if include_dirs {
                self.compute_directory(repo, path)
            } else {
                self.ensure_placeholder(repo, path)
            }
        } else if include_files {
            self.compute_file(repo, path)
        } else {
            Ok(ComputeOutcome::Skipped {
                placeholder_written: false,
            })
        }
    }

    fn compute_file(
        &self,
        repo: &WatchedRepository,
        path: &str,
    ) -> Result<ComputeOutcome, ComputeError> {
        let record = match self.queries.whereis(&repo.path, path)? {
            Some(info) => {
                let required = self.queries.numcopies(&repo.path)?;
                let present = if info.here {
                    PresentStatus::Present
                } else {
                    PresentStatus::Absent
                };
                StatusRecord::file(
                    path,
                    present,
                    EnoughCopies::from_counts(info.copies, required),
                    info.copies,
                    info.key,
                )
            }
            None => StatusRecord::untracked(path, false),
        };

        let previous = self.store.get(repo.uuid, path)?;
        self.store.put(repo.uuid, &record)?;
        if previous.map_or(true, |p| !same_status(&p, &record)) {
            self.invalidate_parent(repo, path)?;
        }

        tracing::debug!(
            repo = %repo.uuid,
            path = %path,
            tracked = record.is_tracked,
            present = ?record.present,
            "Computed file status"
        );
        Ok(ComputeOutcome::Written(record))
    }

    fn compute_directory(
        &self,
        repo: &WatchedRepository,
        path: &str,
    ) -> Result<ComputeOutcome, ComputeError> {
        let info = self.queries.directory_info(&repo.path, path)?;
        let mut record = self
            .store
            .get(repo.uuid, path)?
            .unwrap_or_else(|| StatusRecord::directory_placeholder(path));
        record.is_dir = true;
        record.is_tracked = true;
        record.present = Some(directory_presence(info));
        // copy counts come from the children, which the aggregator folds
        record.needs_update = true;
        record.last_modified = Utc::now();
        self.store.put(repo.uuid, &record)?;
        Ok(ComputeOutcome::Written(record))
    }

    fn ensure_placeholder(
        &self,
        repo: &WatchedRepository,
        path: &str,
    ) -> Result<ComputeOutcome, ComputeError> {
        if self.store.get(repo.uuid, path)?.is_some() {
            return Ok(ComputeOutcome::Skipped {
                placeholder_written: false,
            });
        }
        self.store
            .put(repo.uuid, &StatusRecord::directory_placeholder(path))?;
        Ok(ComputeOutcome::Skipped {
            placeholder_written: true,
        })
    }

    fn remove_vanished(
        &self,
        repo: &WatchedRepository,
        path: &str,
    ) -> Result<ComputeOutcome, ComputeError> {
        self.store.remove(repo.uuid, path)?;
        self.invalidate_parent(repo, path)?;
        tracing::debug!(repo = %repo.uuid, path = %path, "Removed status of vanished path");
        Ok(ComputeOutcome::Removed)
    }

    fn invalidate_parent(&self, repo: &WatchedRepository, path: &str) -> Result<(), DatabaseError> {
        match repo_path::parent(path) {
            Some(parent) if exists(&repo.path, &parent) => self.store.invalidate(repo.uuid, &parent),
            _ => Ok(()),
        }
    }
}

fn exists(repo_root: &Path, path: &str) -> bool {
    std::fs::symlink_metadata(repo_path::absolute_path(repo_root, path)).is_ok()
}

/// Presence of a directory from its key counts; a directory without annexed
/// files counts as present
pub fn directory_presence(info: DirectoryInfo) -> PresentStatus {
    if info.local_keys >= info.annexed_files {
        PresentStatus::Present
    } else if info.local_keys == 0 {
        PresentStatus::Absent
    } else {
        PresentStatus::PartiallyPresent
    }
}

fn same_status(a: &StatusRecord, b: &StatusRecord) -> bool {
    a.present == b.present
        && a.enough_copies == b.enough_copies
        && a.number_of_copies == b.number_of_copies
        && a.is_tracked == b.is_tracked
        && a.content_key == b.content_key
        && a.is_dir == b.is_dir
}
