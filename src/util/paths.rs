//! Locations under the data directory
//!
//! Everything annex-watch writes lives below one directory, `~/.annex-watch`
//! unless `--data-dir` points elsewhere:
//!
//! ```text
//! config.toml
//! annex-watch.db
//! logs/annex-watch.log
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

const DIR_NAME: &str = ".annex-watch";
const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "annex-watch.db";
const LOG_FILE: &str = "annex-watch.log";

/// Fix the data directory for this process; only the first call counts.
pub fn init_data_dir(custom_path: Option<PathBuf>) -> &'static Path {
    let dir = DATA_DIR.get_or_init(|| custom_path.clone().unwrap_or_else(default_data_dir));
    if custom_path.is_some_and(|p| p != *dir) {
        tracing::debug!(path = %dir.display(), "Data directory already initialized");
    }
    dir
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DIR_NAME))
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

pub fn config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

pub fn database_path() -> PathBuf {
    data_dir().join(DATABASE_FILE)
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join(LOG_FILE)
}
