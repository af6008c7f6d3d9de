//! Last resolved watch set, for readers outside the engine

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::database::{format_timestamp, lock, DatabaseError};
use super::models::WatchedRepository;

#[derive(Clone)]
pub struct WatchedRepositoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl WatchedRepositoryStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Replace the stored set with `repositories`
    pub fn replace_all(&self, repositories: &[WatchedRepository]) -> Result<(), DatabaseError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM watched_repositories", [])?;
        let now = format_timestamp(Utc::now());
        for repo in repositories {
            tx.execute(
                "INSERT OR REPLACE INTO watched_repositories (uuid, path, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    repo.uuid.to_string(),
                    repo.path.to_string_lossy().to_string(),
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<WatchedRepository>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT uuid, path FROM watched_repositories ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(uuid, path)| {
                Uuid::parse_str(&uuid)
                    .ok()
                    .map(|uuid| WatchedRepository::new(uuid, PathBuf::from(path)))
            })
            .collect())
    }

    /// The watched repository whose tree contains `path`, preferring the
    /// deepest match for nested repositories
    pub fn find_containing(&self, path: &Path) -> Result<Option<WatchedRepository>, DatabaseError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|repo| path.starts_with(&repo.path))
            .max_by_key(|repo| repo.path.components().count()))
    }
}
