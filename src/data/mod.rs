//! Data persistence layer
//!
//! SQLite storage for path status, the resolved watch set, inbound command
//! requests, status lookups the UI is waiting on and the visible-folder
//! signal.

mod command_request;
mod database;
mod migrations;
mod models;
mod status;
mod status_request;
mod visible_folder;
mod watched_repository;

pub use command_request::CommandRequestStore;
pub use database::{Database, DatabaseError};
pub use models::{
    CommandRequest, EnoughCopies, PresentStatus, StatusRecord, WatchedRepository,
};
pub use status::{SqliteStatusStore, StatusStore};
pub use status_request::StatusRequestStore;
pub use visible_folder::VisibleFolderStore;
pub use watched_repository::WatchedRepositoryStore;
