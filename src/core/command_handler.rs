//! Runs queued user commands and schedules the follow-up refresh

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::request_queue::{Priority, StatusRequestQueue};
use crate::data::{CommandRequestStore, DatabaseError, WatchedRepository};
use crate::git::{AnnexQueries, CommandOutput, UserCommand};

/// A user command that did not succeed, with the tool's own text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub repo: Uuid,
    pub path: String,
    pub command: UserCommand,
    pub title: String,
    pub message: String,
}

impl CommandFailure {
    fn from_output(repo: Uuid, path: String, command: UserCommand, output: &CommandOutput) -> Self {
        Self {
            repo,
            path,
            command,
            title: output
                .error
                .first()
                .cloned()
                .unwrap_or_else(|| command.default_error_title().to_string()),
            message: output.output.join("\n"),
        }
    }
}

pub struct CommandHandler {
    queries: AnnexQueries,
    requests: CommandRequestStore,
    queue: Arc<StatusRequestQueue>,
}

impl CommandHandler {
    pub fn new(
        queries: AnnexQueries,
        requests: CommandRequestStore,
        queue: Arc<StatusRequestQueue>,
    ) -> Self {
        Self {
            queries,
            requests,
            queue,
        }
    }

    /// Drain and run the pending requests of one repository.
    ///
    /// Each success queues a high-priority refresh that ignores any stored
    /// record; each failure is returned for the UI.
    pub fn handle_pending(
        &self,
        repo: &WatchedRepository,
    ) -> Result<Vec<CommandFailure>, DatabaseError> {
        let mut failures = Vec::new();
        for request in self.requests.fetch_and_delete(repo.uuid)? {
            tracing::info!(
                repo = %repo.uuid,
                path = %request.path,
                command = %request.command,
                "Running user command"
            );
            let output = self
                .queries
                .run_user_command(&repo.path, request.command, &request.path);

            if output.success {
                self.queue.enqueue(
                    &request.path,
                    repo,
                    Duration::ZERO,
                    true,
                    true,
                    Priority::High,
                );
            } else {
                tracing::warn!(
                    repo = %repo.uuid,
                    path = %request.path,
                    command = %request.command,
                    error = %output.error_text(),
                    "User command failed"
                );
                failures.push(CommandFailure::from_output(
                    repo.uuid,
                    request.path,
                    request.command,
                    &output,
                ));
            }
        }
        Ok(failures)
    }
}
