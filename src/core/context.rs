//! Everything the engine loops share, built once per process.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use super::change_detector::ChangeDetector;
use super::command_handler::CommandHandler;
use super::folder_aggregator::FolderAggregator;
use super::request_queue::StatusRequestQueue;
use super::requested_statuses::RequestedStatuses;
use super::status_computer::StatusComputer;
use super::visible_folders::VisibleRescanner;
use super::watched::WatchSet;
use crate::config::{Config, ConfigError, EngineConfig};
use crate::data::{
    CommandRequestStore, Database, SqliteStatusStore, StatusRequestStore, StatusStore,
    VisibleFolderStore, WatchedRepositoryStore,
};
use crate::git::{AnnexQueries, CommandRunner};

/// Where the list of repository paths to watch comes from
#[derive(Debug, Clone)]
pub enum WatchSource {
    /// Re-read `[watch] repositories` from this config file on every reload
    ConfigFile(PathBuf),
    Fixed(Vec<PathBuf>),
}

impl WatchSource {
    pub fn paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
        match self {
            WatchSource::ConfigFile(path) => Ok(Config::load_from(path)?.watched_repositories),
            WatchSource::Fixed(paths) => Ok(paths.clone()),
        }
    }
}

/// Shared engine state.
///
/// Owns the stores, the scheduler and the components that feed it, plus the
/// current watch set.
pub struct EngineContext {
    config: EngineConfig,
    watch_source: WatchSource,
    queries: AnnexQueries,
    statuses: Arc<dyn StatusStore>,
    watched_store: WatchedRepositoryStore,
    watch_set: RwLock<WatchSet>,
    queue: Arc<StatusRequestQueue>,
    detector: ChangeDetector,
    aggregator: FolderAggregator,
    commands: CommandHandler,
    visible: VisibleRescanner,
    requested: RequestedStatuses,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        watch_source: WatchSource,
        runner: Arc<dyn CommandRunner>,
        database: &Database,
    ) -> Self {
        let queries = AnnexQueries::new(runner);
        let statuses: Arc<dyn StatusStore> =
            Arc::new(SqliteStatusStore::new(database.connection()));

        let computer = Arc::new(StatusComputer::new(queries.clone(), statuses.clone()));
        let queue = Arc::new(StatusRequestQueue::new(
            computer,
            statuses.clone(),
            config.high_priority_cap,
            config.low_priority_cap,
        ));
        let detector = ChangeDetector::new(queries.clone(), statuses.clone());
        let aggregator = FolderAggregator::new(
            queries.clone(),
            statuses.clone(),
            queue.clone(),
            config.backfill_staleness,
        );
        let commands = CommandHandler::new(
            queries.clone(),
            CommandRequestStore::new(database.connection()),
            queue.clone(),
        );
        let visible = VisibleRescanner::new(
            statuses.clone(),
            VisibleFolderStore::new(database.connection()),
            queue.clone(),
            config.visible_rescan_staleness,
        );
        let requested = RequestedStatuses::new(
            StatusRequestStore::new(database.connection()),
            queue.clone(),
        );

        Self {
            config,
            watch_source,
            queries,
            statuses,
            watched_store: WatchedRepositoryStore::new(database.connection()),
            watch_set: RwLock::new(WatchSet::default()),
            queue,
            detector,
            aggregator,
            commands,
            visible,
            requested,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn watch_source(&self) -> &WatchSource {
        &self.watch_source
    }

    pub fn queries(&self) -> &AnnexQueries {
        &self.queries
    }

    pub fn statuses(&self) -> &Arc<dyn StatusStore> {
        &self.statuses
    }

    pub fn watched_store(&self) -> &WatchedRepositoryStore {
        &self.watched_store
    }

    /// Snapshot of the current watch set
    pub fn watch_set(&self) -> WatchSet {
        self.watch_set.read().clone()
    }

    /// Install a new watch set, returning the previous one
    pub fn replace_watch_set(&self, set: WatchSet) -> WatchSet {
        std::mem::replace(&mut *self.watch_set.write(), set)
    }

    pub fn queue(&self) -> &Arc<StatusRequestQueue> {
        &self.queue
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn aggregator(&self) -> &FolderAggregator {
        &self.aggregator
    }

    pub fn commands(&self) -> &CommandHandler {
        &self.commands
    }

    pub fn visible(&self) -> &VisibleRescanner {
        &self.visible
    }

    pub fn requested(&self) -> &RequestedStatuses {
        &self.requested
    }
}
