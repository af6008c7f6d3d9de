//! Inbound user command queue

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::database::{format_timestamp, lock, parse_timestamp, DatabaseError};
use super::models::CommandRequest;
use crate::git::UserCommand;

/// Rows written by a UI or the `request` CLI, drained by the engine
#[derive(Clone)]
pub struct CommandRequestStore {
    conn: Arc<Mutex<Connection>>,
}

impl CommandRequestStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Queue a command; returns the row id
    pub fn enqueue(
        &self,
        repo: Uuid,
        path: &str,
        command: UserCommand,
    ) -> Result<i64, DatabaseError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO command_requests (repo_uuid, path, command_type, command, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                repo.to_string(),
                path,
                command.kind(),
                command.action(),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Take every pending request for `repo`, oldest first.
    ///
    /// Rows are deleted in the same transaction; rows naming an unknown
    /// command are dropped with a warning.
    pub fn fetch_and_delete(&self, repo: Uuid) -> Result<Vec<CommandRequest>, DatabaseError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let rows: Vec<(i64, String, String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, path, command_type, command, created_at FROM command_requests
                 WHERE repo_uuid = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![repo.to_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        if let Some((last_id, ..)) = rows.last() {
            tx.execute(
                "DELETE FROM command_requests WHERE repo_uuid = ?1 AND id <= ?2",
                params![repo.to_string(), last_id],
            )?;
        }
        tx.commit()?;

        let requests = rows
            .into_iter()
            .filter_map(|(id, path, kind, action, created_at)| {
                match UserCommand::from_parts(&kind, &action) {
                    Some(command) => Some(CommandRequest {
                        id,
                        repo_uuid: repo,
                        path,
                        command,
                        created_at: parse_timestamp(&created_at),
                    }),
                    None => {
                        tracing::warn!(
                            repo = %repo,
                            path = %path,
                            command_type = %kind,
                            command = %action,
                            "Dropping unknown command request"
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(requests)
    }

    /// Number of queued requests across all repositories
    pub fn pending_count(&self) -> Result<usize, DatabaseError> {
        let conn = lock(&self.conn)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM command_requests", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
