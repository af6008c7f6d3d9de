//! The set of repositories under watch

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

pub use crate::data::WatchedRepository;
use crate::git::AnnexQueries;

/// Immutable snapshot of the watched repositories.
///
/// Never edited in place: a configuration change produces a new set which
/// replaces the old one wholesale.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    repositories: Arc<[WatchedRepository]>,
}

impl WatchSet {
    pub fn new(repositories: Vec<WatchedRepository>) -> Self {
        Self {
            repositories: repositories.into(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedRepository> {
        self.repositories.iter()
    }

    pub fn to_vec(&self) -> Vec<WatchedRepository> {
        self.repositories.to_vec()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn get(&self, uuid: Uuid) -> Option<&WatchedRepository> {
        self.repositories.iter().find(|r| r.uuid == uuid)
    }

    pub fn uuids(&self) -> HashSet<Uuid> {
        self.repositories.iter().map(|r| r.uuid).collect()
    }

    /// Same identities at the same paths
    pub fn same_as(&self, other: &WatchSet) -> bool {
        let key = |set: &WatchSet| {
            let mut pairs: Vec<(Uuid, PathBuf)> =
                set.iter().map(|r| (r.uuid, r.path.clone())).collect();
            pairs.sort();
            pairs
        };
        key(self) == key(other)
    }

    /// Repositories in `self` whose identity is not in `previous`
    pub fn added_since(&self, previous: &WatchSet) -> Vec<WatchedRepository> {
        let known = previous.uuids();
        self.iter()
            .filter(|r| !known.contains(&r.uuid))
            .cloned()
            .collect()
    }

    /// Repositories present in both sets whose path changed, at their new path
    pub fn moved_since(&self, previous: &WatchSet) -> Vec<WatchedRepository> {
        self.iter()
            .filter(|r| previous.get(r.uuid).is_some_and(|old| old.path != r.path))
            .cloned()
            .collect()
    }

    /// Identities in `previous` that are gone from `self`
    pub fn removed_since(&self, previous: &WatchSet) -> Vec<Uuid> {
        let current = self.uuids();
        previous
            .iter()
            .map(|r| r.uuid)
            .filter(|uuid| !current.contains(uuid))
            .collect()
    }
}

/// Resolve configured paths into watched repositories.
///
/// Entries that do not exist or have no `annex.uuid` are skipped with a
/// warning; they are tried again on the next reload. Duplicate identities
/// keep the first path listed.
pub fn resolve_watch_list(paths: &[PathBuf], queries: &AnnexQueries) -> WatchSet {
    let mut seen = HashSet::new();
    let mut repositories = Vec::new();

    for path in paths {
        let path = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Watched path is not accessible");
                continue;
            }
        };
        match queries.repository_uuid(&path) {
            Ok(uuid) => {
                if seen.insert(uuid) {
                    repositories.push(WatchedRepository::new(uuid, path));
                } else {
                    tracing::warn!(
                        repo = %uuid,
                        path = %path.display(),
                        "Repository listed twice, ignoring duplicate"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping watched path");
            }
        }
    }

    WatchSet::new(repositories)
}
