//! User-issued commands (get/drop/lock...) forwarded from the UI

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::command::VcsCommand;

/// git-annex subcommands a user can trigger on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnexAction {
    Get,
    Add,
    Drop,
    Unlock,
    Lock,
}

impl AnnexAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnexAction::Get => "get",
            AnnexAction::Add => "add",
            AnnexAction::Drop => "drop",
            AnnexAction::Unlock => "unlock",
            AnnexAction::Lock => "lock",
        }
    }
}

impl FromStr for AnnexAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "get" => Ok(AnnexAction::Get),
            "add" => Ok(AnnexAction::Add),
            "drop" => Ok(AnnexAction::Drop),
            "unlock" => Ok(AnnexAction::Unlock),
            "lock" => Ok(AnnexAction::Lock),
            _ => Err(()),
        }
    }
}

/// Plain git subcommands a user can trigger on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAction {
    Add,
}

impl GitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitAction::Add => "add",
        }
    }
}

impl FromStr for GitAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "add" => Ok(GitAction::Add),
            _ => Err(()),
        }
    }
}

/// A command requested by the user for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "action", rename_all = "kebab-case")]
pub enum UserCommand {
    Git(GitAction),
    Annex(AnnexAction),
}

impl UserCommand {
    /// Stored `command_type` column value
    pub fn kind(&self) -> &'static str {
        match self {
            UserCommand::Git(_) => "git",
            UserCommand::Annex(_) => "git-annex",
        }
    }

    /// Stored `command` column value
    pub fn action(&self) -> &'static str {
        match self {
            UserCommand::Git(action) => action.as_str(),
            UserCommand::Annex(action) => action.as_str(),
        }
    }

    /// Rebuild from the stored `(command_type, command)` pair
    pub fn from_parts(kind: &str, action: &str) -> Option<Self> {
        match kind {
            "git" => GitAction::from_str(action).ok().map(UserCommand::Git),
            "git-annex" => AnnexAction::from_str(action).ok().map(UserCommand::Annex),
            _ => None,
        }
    }

    /// The command to run for `path` (relative to the repository root)
    pub fn to_vcs_command(&self, path: &str) -> VcsCommand {
        match self {
            UserCommand::Git(action) => VcsCommand::git([action.as_str(), "--", path]),
            UserCommand::Annex(action) => VcsCommand::annex([action.as_str(), "--", path]),
        }
    }

    /// Title shown when the command fails without any stderr
    pub fn default_error_title(&self) -> &'static str {
        match self {
            UserCommand::Git(_) => "git: error",
            UserCommand::Annex(_) => "git-annex: error",
        }
    }
}

impl std::fmt::Display for UserCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.action())
    }
}
