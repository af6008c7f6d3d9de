pub mod config;
pub mod core;
pub mod data;
pub mod git;
pub mod util;

pub use config::Config;
pub use self::core::{EngineContext, EngineHandle, EngineUpdate, StatusEngine, WatchSource};
pub use data::{Database, StatusRecord, WatchedRepository};
pub use git::{AnnexQueries, CommandRunner, ProcessRunner, UserCommand};
