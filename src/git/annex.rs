//! Structured git / git-annex queries
//!
//! Everything here goes through a [`CommandRunner`]; the parsers only look at
//! the fields they need from git-annex's `--json` output.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::command::{CommandOutput, CommandRunner, VcsCommand};
use super::user_command::UserCommand;
use crate::util::repo_path;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("No commits on {0}")]
    NoCommits(String),
    #[error("Repository has no annex.uuid: {0}")]
    MissingUuid(String),
    #[error("Unexpected output from {command}: {detail}")]
    UnexpectedOutput { command: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    fn failed(command: &VcsCommand, output: &CommandOutput) -> Self {
        GitError::CommandFailed {
            command: command.display(),
            message: output.error_text(),
        }
    }
}

/// The two commit sequences a repository is tracked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryLine {
    /// The checked-out branch: file content and tracking changes
    Primary,
    /// The `git-annex` branch: content location logs
    Metadata,
}

impl HistoryLine {
    pub fn revision(&self) -> &'static str {
        match self {
            HistoryLine::Primary => "HEAD",
            HistoryLine::Metadata => "git-annex",
        }
    }
}

/// Location facts for one annexed file, from `git annex whereis`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereisInfo {
    pub key: Option<String>,
    pub copies: u32,
    pub here: bool,
}

/// Presence counts for a directory, from `git annex info --fast`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryInfo {
    pub local_keys: u64,
    pub annexed_files: u64,
}

/// An immediate child of a directory, relative to the repository root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChildEntry {
    pub path: String,
    pub is_dir: bool,
}

/// Queries against one or more repositories through a shared runner
#[derive(Clone)]
pub struct AnnexQueries {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for AnnexQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnexQueries").finish_non_exhaustive()
    }
}

impl AnnexQueries {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn run(&self, repo: &Path, command: &VcsCommand) -> CommandOutput {
        self.runner.run(repo, command)
    }

    /// The repository identity stored in `annex.uuid`
    pub fn repository_uuid(&self, repo: &Path) -> Result<Uuid, GitError> {
        let command = VcsCommand::git(["config", "annex.uuid"]);
        let output = self.run(repo, &command);
        let missing = || GitError::MissingUuid(repo.display().to_string());
        if !output.success {
            return Err(missing());
        }
        let line = output
            .output
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .ok_or_else(missing)?;
        Uuid::parse_str(line).map_err(|e| GitError::UnexpectedOutput {
            command: command.display(),
            detail: e.to_string(),
        })
    }

    /// Current head commit of a history line
    pub fn head_commit(&self, repo: &Path, line: HistoryLine) -> Result<String, GitError> {
        let command = VcsCommand::git(["log", "-n", "1", "--pretty=format:%H", line.revision()]);
        let output = self.run(repo, &command);
        if !output.success {
            let message = output.error_text();
            if is_no_commits_error(&message) {
                return Err(GitError::NoCommits(line.revision().to_string()));
            }
            return Err(GitError::CommandFailed {
                command: command.display(),
                message,
            });
        }
        output
            .output
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(|l| l.to_string())
            .ok_or_else(|| GitError::NoCommits(line.revision().to_string()))
    }

    /// Paths touched on the primary line in `from..to`
    pub fn paths_changed_since(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<BTreeSet<String>, GitError> {
        let output = self.log_names(repo, from, to)?;
        Ok(output
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    /// Content keys whose location log changed on the metadata line in `from..to`
    pub fn keys_changed_since(
        &self,
        repo: &Path,
        from: &str,
        to: &str,
    ) -> Result<BTreeSet<String>, GitError> {
        let output = self.log_names(repo, from, to)?;
        Ok(output.iter().filter_map(|l| location_log_key(l)).collect())
    }

    fn log_names(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let range = format!("{}..{}", from, to);
        let command = VcsCommand::git([
            "-c",
            "core.quotepath=off",
            "log",
            "--name-only",
            "--pretty=format:",
            range.as_str(),
        ]);
        let output = self.run(repo, &command);
        if !output.success {
            return Err(GitError::failed(&command, &output));
        }
        Ok(output.output)
    }

    /// Location facts for a file; None when git-annex does not manage it
    pub fn whereis(&self, repo: &Path, path: &str) -> Result<Option<WhereisInfo>, GitError> {
        let command = VcsCommand::annex(["whereis", "--json", "--", path]);
        let output = self.run(repo, &command);
        let parsed = output.output.iter().find_map(|line| parse_whereis(line));
        match parsed {
            Some(info) => Ok(Some(info)),
            None if output.success || is_not_annexed_error(&output.error_text()) => Ok(None),
            None => Err(GitError::failed(&command, &output)),
        }
    }

    /// Required number of copies (`git annex numcopies`)
    pub fn numcopies(&self, repo: &Path) -> Result<u32, GitError> {
        let command = VcsCommand::annex(["numcopies"]);
        let output = self.run(repo, &command);
        if !output.success {
            return Err(GitError::failed(&command, &output));
        }
        parse_numcopies(&output.output).ok_or_else(|| GitError::UnexpectedOutput {
            command: command.display(),
            detail: output.output.join("\n"),
        })
    }

    /// Local vs annexed key counts below a directory
    pub fn directory_info(&self, repo: &Path, path: &str) -> Result<DirectoryInfo, GitError> {
        let command = VcsCommand::annex(["info", "--json", "--fast", "--", path]);
        let output = self.run(repo, &command);
        if !output.success {
            return Err(GitError::failed(&command, &output));
        }
        output
            .output
            .iter()
            .find_map(|line| parse_directory_info(line))
            .ok_or_else(|| GitError::UnexpectedOutput {
                command: command.display(),
                detail: output.output.join("\n"),
            })
    }

    /// Immediate children of `dir` on disk, minus `.git` and ignored paths
    pub fn immediate_children_not_ignored(
        &self,
        repo: &Path,
        dir: &str,
    ) -> Result<Vec<ChildEntry>, GitError> {
        let absolute = repo_path::absolute_path(repo, dir);
        let mut children = Vec::new();
        for entry in std::fs::read_dir(&absolute)? {
            let entry = entry?;
            // stored paths are strings; a lossy name would never exist on disk
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!(
                        dir = %absolute.display(),
                        name = ?raw,
                        "Skipping entry whose name is not valid UTF-8"
                    );
                    continue;
                }
            };
            if name == repo_path::GIT_DIR {
                continue;
            }
            children.push(ChildEntry {
                path: repo_path::join(dir, &name),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        if children.is_empty() {
            return Ok(children);
        }
        children.sort();

        let ignored = self.ignored_paths(repo, children.iter().map(|c| c.path.as_str()))?;
        children.retain(|c| !ignored.contains(&c.path));
        Ok(children)
    }

    fn ignored_paths<'a>(
        &self,
        repo: &Path,
        paths: impl Iterator<Item = &'a str>,
    ) -> Result<BTreeSet<String>, GitError> {
        let mut args = vec!["check-ignore".to_string(), "--".to_string()];
        args.extend(paths.map(|p| p.to_string()));
        let command = VcsCommand::Git { args };
        let output = self.run(repo, &command);
        // exit status 1 with no stderr: nothing matched
        if !output.success && !output.error.iter().all(|l| l.trim().is_empty()) {
            return Err(GitError::failed(&command, &output));
        }
        Ok(output
            .output
            .iter()
            .map(|l| l.trim().trim_end_matches('/').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Run a user-requested command on `path`; the output is returned as-is
    pub fn run_user_command(&self, repo: &Path, command: UserCommand, path: &str) -> CommandOutput {
        self.run(repo, &command.to_vcs_command(path))
    }
}

fn is_no_commits_error(message: &str) -> bool {
    message.contains("does not have any commits")
        || message.contains("unknown revision")
        || message.contains("ambiguous argument")
}

/// git-annex's own wording for a path it does not manage, e.g.
/// `git-annex: photos/a.jpg not found` followed by `whereis: 1 failed`
fn is_not_annexed_error(message: &str) -> bool {
    message.lines().map(str::trim).any(|line| {
        line.contains("not an annexed file")
            || line.contains("did not find any files")
            || (line.starts_with("git-annex: ") && line.ends_with(" not found"))
    })
}

/// Key named by a location log path `xxx/yyy/KEY.log`
pub fn location_log_key(line: &str) -> Option<String> {
    let line = line.trim();
    let stem = line.strip_suffix(".log")?;
    let parts: Vec<&str> = stem.split('/').collect();
    match parts.as_slice() {
        [a, b, key] if !a.is_empty() && !b.is_empty() && !key.is_empty() => {
            Some((*key).to_string())
        }
        _ => None,
    }
}

/// Parse one line of `git annex whereis --json`
pub fn parse_whereis(line: &str) -> Option<WhereisInfo> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let locations = value.get("whereis")?.as_array()?;
    let here = locations
        .iter()
        .any(|loc| loc.get("here").and_then(Value::as_bool).unwrap_or(false));
    Some(WhereisInfo {
        key: value.get("key").and_then(Value::as_str).map(str::to_string),
        copies: locations.len() as u32,
        here,
    })
}

/// Parse one line of `git annex info --json --fast <dir>`
pub fn parse_directory_info(line: &str) -> Option<DirectoryInfo> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    Some(DirectoryInfo {
        local_keys: count_field(&value, "local annex keys")?,
        annexed_files: count_field(&value, "annexed files in working tree")?,
    })
}

// git-annex has emitted these counts both as numbers and as strings
fn count_field(value: &Value, name: &str) -> Option<u64> {
    match value.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First integer in `git annex numcopies` output, e.g. "2" or "(default is 1)"
pub fn parse_numcopies(lines: &[String]) -> Option<u32> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NUMBER.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()?;
    lines
        .iter()
        .find_map(|line| re.find(line))
        .and_then(|m| m.as_str().parse().ok())
}
