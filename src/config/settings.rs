use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use toml_edit::{Array, DocumentMut, Item, Table};

use crate::util::paths::config_path;
use crate::util::tools::{Tool, ToolPaths};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),
    #[error("[watch] repositories is not an array")]
    WatchListNotArray,
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Repository roots from `[watch] repositories`, `~` expanded
    pub watched_repositories: Vec<PathBuf>,
    /// Configured paths for external tools (git, git-annex)
    pub tool_paths: ToolPaths,
    pub engine: EngineConfig,
}

/// Loop periods, concurrency caps and staleness budgets for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub scheduler_tick: Duration,
    pub aggregator_tick: Duration,
    pub detector_tick: Duration,
    pub command_tick: Duration,
    pub visible_tick: Duration,
    pub request_tick: Duration,
    pub watch_reload_interval: Duration,
    /// In-flight computations per repository while draining the high tier
    pub high_priority_cap: usize,
    /// In-flight computations per repository while draining the low tier
    pub low_priority_cap: usize,
    /// Staleness budget for children the aggregator finds without a record
    pub backfill_staleness: Duration,
    /// Records of visible paths older than this are rescanned
    pub visible_rescan_staleness: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_tick: Duration::from_secs(1),
            aggregator_tick: Duration::from_secs(1),
            detector_tick: Duration::from_secs(1),
            command_tick: Duration::from_secs(1),
            visible_tick: Duration::from_secs(1),
            request_tick: Duration::from_secs(1),
            watch_reload_interval: Duration::from_secs(5),
            high_priority_cap: 10,
            low_priority_cap: 5,
            backfill_staleness: Duration::from_secs(60),
            visible_rescan_staleness: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlWatchConfig {
    pub repositories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlEngineConfig {
    pub scheduler_tick_ms: Option<u64>,
    pub aggregator_tick_ms: Option<u64>,
    pub detector_tick_ms: Option<u64>,
    pub command_tick_ms: Option<u64>,
    pub visible_tick_ms: Option<u64>,
    pub request_tick_ms: Option<u64>,
    pub watch_reload_ms: Option<u64>,
    pub high_priority_cap: Option<usize>,
    pub low_priority_cap: Option<usize>,
    pub backfill_staleness_secs: Option<u64>,
    pub visible_rescan_staleness_secs: Option<u64>,
}

impl TomlEngineConfig {
    fn merge_into(self, engine: &mut EngineConfig) {
        let millis = |v: Option<u64>, slot: &mut Duration| {
            if let Some(ms) = v {
                *slot = Duration::from_millis(ms.max(1));
            }
        };
        millis(self.scheduler_tick_ms, &mut engine.scheduler_tick);
        millis(self.aggregator_tick_ms, &mut engine.aggregator_tick);
        millis(self.detector_tick_ms, &mut engine.detector_tick);
        millis(self.command_tick_ms, &mut engine.command_tick);
        millis(self.visible_tick_ms, &mut engine.visible_tick);
        millis(self.request_tick_ms, &mut engine.request_tick);
        millis(self.watch_reload_ms, &mut engine.watch_reload_interval);

        if let Some(cap) = self.high_priority_cap {
            engine.high_priority_cap = cap.max(1);
        }
        if let Some(cap) = self.low_priority_cap {
            engine.low_priority_cap = cap.max(1);
        }
        if let Some(secs) = self.backfill_staleness_secs {
            engine.backfill_staleness = Duration::from_secs(secs);
        }
        if let Some(secs) = self.visible_rescan_staleness_secs {
            engine.visible_rescan_staleness = Duration::from_secs(secs);
        }
    }
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub watch: Option<TomlWatchConfig>,
    /// Tool path configuration
    pub tools: Option<ToolPaths>,
    pub engine: Option<TomlEngineConfig>,
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(entry: &str) -> PathBuf {
    match entry.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(entry)),
        None if entry == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(entry)),
        None => PathBuf::from(entry),
    }
}

impl Config {
    /// Load configuration from the default location, creating the example
    /// file on first run. A broken file falls back to defaults.
    pub fn load() -> Self {
        let config_file = config_path();

        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );
                Config::default()
            }
        }
    }

    /// Parse a config file and merge it over the defaults; a missing file
    /// yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if !path.exists() {
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let toml_config: TomlConfig = toml::from_str(&contents)?;

        if let Some(watch) = toml_config.watch {
            config.watched_repositories = watch
                .repositories
                .unwrap_or_default()
                .iter()
                .map(|entry| expand_home(entry))
                .collect();
        }
        if let Some(tools) = toml_config.tools {
            config.tool_paths = tools;
        }
        if let Some(engine) = toml_config.engine {
            engine.merge_into(&mut config.engine);
        }

        Ok(config)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }
}

fn read_document(config_file: &Path) -> Result<DocumentMut, ConfigError> {
    let contents = if config_file.exists() {
        fs::read_to_string(config_file)?
    } else {
        String::new()
    };
    Ok(contents.parse::<DocumentMut>()?)
}

fn write_document(config_file: &Path, doc: &DocumentMut) -> Result<(), ConfigError> {
    if let Some(parent) = config_file.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(config_file, doc.to_string())?;
    Ok(())
}

fn watch_array(doc: &mut DocumentMut) -> Result<&mut Array, ConfigError> {
    if !doc.contains_key("watch") {
        doc["watch"] = Item::Table(Table::new());
    }
    let watch = &mut doc["watch"];
    if watch.get("repositories").is_none() {
        watch["repositories"] = toml_edit::value(Array::new());
    }
    watch["repositories"]
        .as_array_mut()
        .ok_or(ConfigError::WatchListNotArray)
}

/// Add a repository to `[watch] repositories`, keeping the rest of the file
/// untouched. Returns false when it was already listed.
pub fn add_watched_repository(config_file: &Path, repo: &Path) -> Result<bool, ConfigError> {
    let mut doc = read_document(config_file)?;
    let entry = repo.to_string_lossy().to_string();
    let list = watch_array(&mut doc)?;
    let exists = list
        .iter()
        .filter_map(|v| v.as_str())
        .any(|v| expand_home(v) == repo);
    if exists {
        return Ok(false);
    }
    list.push(entry);
    write_document(config_file, &doc)?;
    Ok(true)
}

/// Remove a repository from `[watch] repositories`. Returns false when it was
/// not listed.
pub fn remove_watched_repository(config_file: &Path, repo: &Path) -> Result<bool, ConfigError> {
    let mut doc = read_document(config_file)?;
    let list = watch_array(&mut doc)?;
    let before = list.len();
    list.retain(|v| v.as_str().map(|s| expand_home(s) != repo).unwrap_or(true));
    if list.len() == before {
        return Ok(false);
    }
    write_document(config_file, &doc)?;
    Ok(true)
}

/// Save a tool path in the `[tools]` section
pub fn save_tool_path(config_file: &Path, tool: Tool, path: &Path) -> Result<(), ConfigError> {
    let mut doc = read_document(config_file)?;
    if !doc.contains_key("tools") {
        doc["tools"] = Item::Table(Table::new());
    }
    doc["tools"][tool.config_key()] = toml_edit::value(path.to_string_lossy().to_string());
    write_document(config_file, &doc)
}
