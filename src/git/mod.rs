//! Git and git-annex access

mod annex;
mod command;
mod user_command;

pub use annex::{
    location_log_key, parse_directory_info, parse_numcopies, parse_whereis, AnnexQueries,
    ChildEntry, DirectoryInfo, GitError, HistoryLine, WhereisInfo,
};
pub use command::{CommandOutput, CommandRunner, ProcessRunner, VcsCommand};
pub use user_command::{AnnexAction, GitAction, UserCommand};
