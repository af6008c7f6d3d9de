//! Status record storage

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::database::{format_timestamp, lock, parse_timestamp, DatabaseError};
use super::models::{EnoughCopies, PresentStatus, StatusRecord};
use crate::util::repo_path;

/// Read/write contract the engine needs from status storage.
///
/// All calls are synchronous; callers on the async side wrap them in
/// `spawn_blocking`.
pub trait StatusStore: Send + Sync {
    fn get(&self, repo: Uuid, path: &str) -> Result<Option<StatusRecord>, DatabaseError>;

    /// Insert or replace the record for `record.path`
    fn put(&self, repo: Uuid, record: &StatusRecord) -> Result<(), DatabaseError>;

    /// Remove the record for `path` and every record below it
    fn remove(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError>;

    /// Flag a directory for re-aggregation, creating a placeholder if it has
    /// no record yet
    fn invalidate(&self, repo: Uuid, dir: &str) -> Result<(), DatabaseError>;

    /// Records whose parent is `dir`
    fn children_of(&self, repo: Uuid, dir: &str) -> Result<Vec<StatusRecord>, DatabaseError>;

    /// Directories flagged `needs_update` or with unknown aggregate fields
    fn list_incomplete_or_flagged(&self, repo: Uuid) -> Result<Vec<String>, DatabaseError>;

    fn list_staler_than(&self, repo: Uuid, age: Duration) -> Result<Vec<String>, DatabaseError>;

    fn resolve_paths_for_content_keys(
        &self,
        repo: Uuid,
        keys: &BTreeSet<String>,
    ) -> Result<Vec<String>, DatabaseError>;

    fn list_untracked_paths(&self, repo: Uuid) -> Result<Vec<String>, DatabaseError>;
}

const COLUMNS: &str = "path, present, enough_copies, number_of_copies, is_tracked, content_key, is_dir, needs_update, last_modified";

/// SQLite-backed [`StatusStore`]
#[derive(Clone)]
pub struct SqliteStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStatusStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StatusRecord> {
        let present: Option<String> = row.get(1)?;
        let enough: Option<String> = row.get(2)?;
        let copies: Option<i64> = row.get(3)?;
        let last_modified: String = row.get(8)?;
        Ok(StatusRecord {
            path: row.get(0)?,
            present: present.and_then(|v| PresentStatus::from_str(&v).ok()),
            enough_copies: enough.and_then(|v| EnoughCopies::from_str(&v).ok()),
            number_of_copies: copies.and_then(|c| u32::try_from(c).ok()),
            is_tracked: row.get::<_, i64>(4)? != 0,
            content_key: row.get(5)?,
            is_dir: row.get::<_, i64>(6)? != 0,
            needs_update: row.get::<_, i64>(7)? != 0,
            last_modified: parse_timestamp(&last_modified),
        })
    }

    fn insert(conn: &Connection, repo: Uuid, record: &StatusRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO statuses (repo_uuid, path, parent, present, enough_copies, number_of_copies, is_tracked, content_key, is_dir, needs_update, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                repo.to_string(),
                record.path,
                repo_path::parent(&record.path),
                record.present.map(|p| p.as_str()),
                record.enough_copies.map(|e| e.as_str()),
                record.number_of_copies.map(i64::from),
                record.is_tracked as i32,
                record.content_key,
                record.is_dir as i32,
                record.needs_update as i32,
                format_timestamp(record.last_modified),
            ],
        )?;
        Ok(())
    }

    fn query_paths(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<String>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(sql)?;
        let paths = stmt
            .query_map(params, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl StatusStore for SqliteStatusStore {
    fn get(&self, repo: Uuid, path: &str) -> Result<Option<StatusRecord>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM statuses WHERE repo_uuid = ?1 AND path = ?2",
                    COLUMNS
                ),
                params![repo.to_string(), path],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn put(&self, repo: Uuid, record: &StatusRecord) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        Self::insert(&conn, repo, record)?;
        Ok(())
    }

    fn remove(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        if repo_path::is_root(path) {
            conn.execute(
                "DELETE FROM statuses WHERE repo_uuid = ?1",
                params![repo.to_string()],
            )?;
            return Ok(());
        }
        let prefix = format!("{}/", path);
        conn.execute(
            "DELETE FROM statuses WHERE repo_uuid = ?1 AND (path = ?2 OR substr(path, 1, ?3) = ?4)",
            params![
                repo.to_string(),
                path,
                prefix.chars().count() as i64,
                prefix
            ],
        )?;
        Ok(())
    }

    fn invalidate(&self, repo: Uuid, dir: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            "UPDATE statuses SET needs_update = 1 WHERE repo_uuid = ?1 AND path = ?2",
            params![repo.to_string(), dir],
        )?;
        if updated == 0 {
            Self::insert(&conn, repo, &StatusRecord::directory_placeholder(dir))?;
        }
        Ok(())
    }

    fn children_of(&self, repo: Uuid, dir: &str) -> Result<Vec<StatusRecord>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statuses WHERE repo_uuid = ?1 AND parent = ?2 ORDER BY path",
            COLUMNS
        ))?;
        let records = stmt
            .query_map(params![repo.to_string(), dir], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_incomplete_or_flagged(&self, repo: Uuid) -> Result<Vec<String>, DatabaseError> {
        self.query_paths(
            "SELECT path FROM statuses WHERE repo_uuid = ?1 AND is_dir = 1
             AND (needs_update = 1 OR (is_tracked = 1 AND (present IS NULL OR enough_copies IS NULL)))",
            params![repo.to_string()],
        )
    }

    fn list_staler_than(&self, repo: Uuid, age: Duration) -> Result<Vec<String>, DatabaseError> {
        self.query_paths(
            "SELECT path FROM statuses WHERE repo_uuid = ?1 AND last_modified < ?2 ORDER BY path",
            params![repo.to_string(), format_timestamp(cutoff(age))],
        )
    }

    fn resolve_paths_for_content_keys(
        &self,
        repo: Uuid,
        keys: &BTreeSet<String>,
    ) -> Result<Vec<String>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT path FROM statuses WHERE repo_uuid = ?1 AND content_key = ?2")?;
        let mut paths = BTreeSet::new();
        for key in keys {
            let rows = stmt
                .query_map(params![repo.to_string(), key], |row| row.get::<_, String>(0))?;
            for path in rows {
                paths.insert(path?);
            }
        }
        Ok(paths.into_iter().collect())
    }

    fn list_untracked_paths(&self, repo: Uuid) -> Result<Vec<String>, DatabaseError> {
        self.query_paths(
            "SELECT path FROM statuses WHERE repo_uuid = ?1 AND is_tracked = 0 ORDER BY path",
            params![repo.to_string()],
        )
    }
}
