//! Folders currently shown to the user

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::database::{format_timestamp, lock, DatabaseError};

/// Written by the file-browser integration, read by the engine
#[derive(Clone)]
pub struct VisibleFolderStore {
    conn: Arc<Mutex<Connection>>,
}

impl VisibleFolderStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn add(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO visible_folders (repo_uuid, path, updated_at) VALUES (?1, ?2, ?3)",
            params![repo.to_string(), path, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn remove(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "DELETE FROM visible_folders WHERE repo_uuid = ?1 AND path = ?2",
            params![repo.to_string(), path],
        )?;
        Ok(())
    }

    /// Visible folders of one repository
    pub fn list(&self, repo: Uuid) -> Result<HashSet<String>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT path FROM visible_folders WHERE repo_uuid = ?1")?;
        let paths = stmt
            .query_map(params![repo.to_string()], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(paths)
    }
}
