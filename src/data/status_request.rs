//! Paths a front end asked about before any status was recorded

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::database::{format_timestamp, lock, DatabaseError};

/// Written by whoever shows badges, drained by the engine once a status exists
#[derive(Clone)]
pub struct StatusRequestStore {
    conn: Arc<Mutex<Connection>>,
}

impl StatusRequestStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Ask for the status of `path`; asking again only refreshes the time
    pub fn request(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO status_requests (repo_uuid, path, requested_at) VALUES (?1, ?2, ?3)",
            params![repo.to_string(), path, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn remove(&self, repo: Uuid, path: &str) -> Result<(), DatabaseError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "DELETE FROM status_requests WHERE repo_uuid = ?1 AND path = ?2",
            params![repo.to_string(), path],
        )?;
        Ok(())
    }

    /// Drop requests that now have a stored status; returns how many
    pub fn clear_answered(&self, repo: Uuid) -> Result<usize, DatabaseError> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM status_requests
             WHERE repo_uuid = ?1
               AND EXISTS (SELECT 1 FROM statuses s
                           WHERE s.repo_uuid = status_requests.repo_uuid
                             AND s.path = status_requests.path)",
            params![repo.to_string()],
        )?;
        Ok(removed)
    }

    /// Requested paths with no stored status, oldest request first
    pub fn unanswered(&self, repo: Uuid) -> Result<Vec<String>, DatabaseError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT r.path FROM status_requests r
             LEFT JOIN statuses s ON s.repo_uuid = r.repo_uuid AND s.path = r.path
             WHERE r.repo_uuid = ?1 AND s.path IS NULL
             ORDER BY r.requested_at, r.path",
        )?;
        let paths = stmt
            .query_map(params![repo.to_string()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }
}
