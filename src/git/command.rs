//! Command execution against a repository
//!
//! Every interaction with git or git-annex goes through [`CommandRunner`], so
//! the engine can be driven by a scripted runner in tests.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::util::{Tool, ToolAvailability};

/// A version-control command, tagged by the tool that runs it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VcsCommand {
    /// Run with the `git` binary
    Git { args: Vec<String> },
    /// Run with the `git-annex` binary
    Annex { args: Vec<String> },
}

impl VcsCommand {
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VcsCommand::Git {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn annex<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VcsCommand::Annex {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            VcsCommand::Git { args } | VcsCommand::Annex { args } => args,
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            VcsCommand::Git { .. } => Tool::Git,
            VcsCommand::Annex { .. } => Tool::GitAnnex,
        }
    }

    /// Human readable form, e.g. `git-annex whereis --json a.txt`
    pub fn display(&self) -> String {
        format!("{} {}", self.tool().binary_name(), self.args().join(" "))
    }
}

/// Result of running a command: success flag plus stdout and stderr lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: Vec<String>,
    pub error: Vec<String>,
}

impl CommandOutput {
    pub fn success<I, S>(output: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: true,
            output: output.into_iter().map(Into::into).collect(),
            error: Vec::new(),
        }
    }

    pub fn failure<I, S>(error: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: false,
            output: Vec::new(),
            error: error.into_iter().map(Into::into).collect(),
        }
    }

    /// Stderr joined for log and error messages
    pub fn error_text(&self) -> String {
        self.error.join("\n")
    }
}

/// Runs version-control commands in a repository working tree.
///
/// Implementations block until the command exits. Non-success is data, not an
/// error: callers inspect [`CommandOutput::success`].
pub trait CommandRunner: Send + Sync {
    fn run(&self, repo_path: &Path, command: &VcsCommand) -> CommandOutput;
}

/// [`CommandRunner`] that spawns the configured binaries
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    git_bin: PathBuf,
    annex_bin: PathBuf,
}

impl ProcessRunner {
    pub fn new(git_bin: PathBuf, annex_bin: PathBuf) -> Self {
        Self { git_bin, annex_bin }
    }

    /// Build a runner from detected tool locations
    pub fn from_tools(tools: &ToolAvailability) -> Self {
        Self::new(
            tools.command_path(Tool::Git),
            tools.command_path(Tool::GitAnnex),
        )
    }

    fn split_lines(bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(|line| line.to_string())
            .collect()
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, repo_path: &Path, command: &VcsCommand) -> CommandOutput {
        let bin = match command {
            VcsCommand::Git { .. } => &self.git_bin,
            VcsCommand::Annex { .. } => &self.annex_bin,
        };

        tracing::trace!(
            repo = %repo_path.display(),
            command = %command.display(),
            "Running command"
        );

        match Command::new(bin)
            .args(command.args())
            .current_dir(repo_path)
            .output()
        {
            Ok(output) => CommandOutput {
                success: output.status.success(),
                output: Self::split_lines(&output.stdout),
                error: Self::split_lines(&output.stderr),
            },
            Err(e) => {
                tracing::warn!(
                    repo = %repo_path.display(),
                    command = %command.display(),
                    error = %e,
                    "Failed to spawn command"
                );
                CommandOutput::failure([format!("{}: {}", bin.display(), e)])
            }
        }
    }
}
