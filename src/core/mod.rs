//! The status engine.
//!
//! - `request_queue`: prioritized scheduler with per-repository capacity
//! - `status_computer`: one path's status from git-annex
//! - `folder_aggregator`: bottom-up directory completion
//! - `change_detector`: commit cursors and changed paths
//! - `command_handler`: user commands and their follow-up refresh
//! - `requested_statuses`: lookups a front end is waiting on
//! - `engine`: the background loops tying them together

mod change_detector;
mod command_handler;
mod context;
mod engine;
mod folder_aggregator;
mod request_queue;
mod requested_statuses;
mod status_computer;
mod visible_folders;
mod watched;

pub use change_detector::{ChangeDetector, CommitCursor, DetectorError};
pub use command_handler::{CommandFailure, CommandHandler};
pub use context::{EngineContext, WatchSource};
pub use engine::{EngineHandle, EngineUpdate, StatusEngine};
pub use folder_aggregator::{
    fold_children, AggregationReport, AggregatorError, FoldedStatus, FolderAggregator,
};
pub use request_queue::{Priority, StatusRequest, StatusRequestQueue};
pub use requested_statuses::RequestedStatuses;
pub use status_computer::{directory_presence, ComputeError, ComputeOutcome, StatusComputer};
pub use visible_folders::{VisibleFolders, VisibleRescanner};
pub use watched::{resolve_watch_list, WatchSet};
