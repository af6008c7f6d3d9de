mod settings;

pub use settings::{
    add_watched_repository, expand_home, remove_watched_repository, save_tool_path, Config,
    ConfigError, EngineConfig, EXAMPLE_CONFIG,
};
