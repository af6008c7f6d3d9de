//! Tool availability detection
//!
//! Locates the `git` and `git-annex` binaries the engine shells out to,
//! honouring paths configured in config.toml.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// External tools that annex-watch depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Git version control
    Git,
    /// git-annex, for content location and copy tracking
    GitAnnex,
}

impl Tool {
    /// Get the binary name for this tool
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::GitAnnex => "git-annex",
        }
    }

    /// Key used for this tool in the `[tools]` config section
    pub fn config_key(&self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::GitAnnex => "git_annex",
        }
    }

    /// Get the display name for this tool
    pub fn display_name(&self) -> &'static str {
        match self {
            Tool::Git => "Git",
            Tool::GitAnnex => "git-annex",
        }
    }

    /// Get all tools
    pub fn all() -> &'static [Tool] {
        &[Tool::Git, Tool::GitAnnex]
    }
}

/// Status of a tool's availability
#[derive(Debug, Clone, Default)]
pub enum ToolStatus {
    /// Tool is available at the given path
    Available(PathBuf),
    /// Tool was not found in PATH or configured location
    #[default]
    NotFound,
    /// A path was configured in config.toml but it's invalid
    ConfiguredPathInvalid(PathBuf),
}

impl ToolStatus {
    /// Check if the tool is available
    pub fn is_available(&self) -> bool {
        matches!(self, ToolStatus::Available(_))
    }

    /// Get the path if available
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ToolStatus::Available(p) => Some(p),
            _ => None,
        }
    }
}

/// Configuration for tool paths from config.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolPaths {
    pub git: Option<PathBuf>,
    pub git_annex: Option<PathBuf>,
}

impl ToolPaths {
    /// Get the configured path for a tool
    pub fn get(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::Git => self.git.as_ref(),
            Tool::GitAnnex => self.git_annex.as_ref(),
        }
    }
}

/// Tracks the availability of all tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    git: ToolStatus,
    git_annex: ToolStatus,
}

impl ToolAvailability {
    /// Detect availability of all tools
    ///
    /// For each tool:
    /// 1. Check if a path is configured in config.toml
    /// 2. If configured, validate that path exists and is executable
    /// 3. If not configured, use `which` to find it in PATH
    pub fn detect(configured_paths: &ToolPaths) -> Self {
        Self {
            git: Self::detect_tool(Tool::Git, configured_paths.git.as_ref()),
            git_annex: Self::detect_tool(Tool::GitAnnex, configured_paths.git_annex.as_ref()),
        }
    }

    fn detect_tool(tool: Tool, configured_path: Option<&PathBuf>) -> ToolStatus {
        if let Some(path) = configured_path {
            if Self::is_valid_executable(path) {
                return ToolStatus::Available(path.clone());
            } else {
                return ToolStatus::ConfiguredPathInvalid(path.clone());
            }
        }

        match which::which(tool.binary_name()) {
            Ok(path) => ToolStatus::Available(path),
            Err(_) => ToolStatus::NotFound,
        }
    }

    /// Check if a path points to a valid executable
    fn is_valid_executable(path: &Path) -> bool {
        if !path.exists() {
            return false;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = path.metadata() {
                let permissions = metadata.permissions();
                return permissions.mode() & 0o111 != 0;
            }
            false
        }

        #[cfg(not(unix))]
        {
            path.is_file()
        }
    }

    /// Get the status for a specific tool
    pub fn status(&self, tool: Tool) -> &ToolStatus {
        match tool {
            Tool::Git => &self.git,
            Tool::GitAnnex => &self.git_annex,
        }
    }

    /// Check if a tool is available
    pub fn is_available(&self, tool: Tool) -> bool {
        self.status(tool).is_available()
    }

    /// Get the path to a tool if available
    pub fn get_path(&self, tool: Tool) -> Option<&PathBuf> {
        self.status(tool).path()
    }

    /// Path to run for a tool, falling back to the bare binary name so the
    /// failure surfaces from the command itself.
    pub fn command_path(&self, tool: Tool) -> PathBuf {
        self.get_path(tool)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(tool.binary_name()))
    }

    /// Get list of missing tools
    pub fn missing_tools(&self) -> Vec<Tool> {
        Tool::all()
            .iter()
            .filter(|&&tool| !self.is_available(tool))
            .copied()
            .collect()
    }
}
