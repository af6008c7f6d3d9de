//! Background status engine
//!
//! One tokio task per loop, each on its own interval: scheduler, aggregator,
//! change detector, command requests, requested statuses, visible rescans and
//! watch-list reload.
//! Blocking work (subprocesses, SQLite, directory walks) runs on the blocking
//! pool so the loops never stall each other.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::EngineContext;
use super::folder_aggregator::AggregationReport;
use super::request_queue::Priority;
use super::watched::{resolve_watch_list, WatchedRepository};
use crate::util::repo_path;

/// Updates sent from the engine to whoever presents them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    /// A user command failed; title and message are the tool's own text
    CommandFailed {
        repo: Uuid,
        path: String,
        title: String,
        message: String,
    },
    /// The watch set was replaced
    WatchListChanged {
        repositories: Vec<WatchedRepository>,
    },
}

/// Handle to stop the engine loops
pub struct EngineHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop every loop and wait for them to exit. Computations already
    /// dispatched run to completion on the blocking pool.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        join_all(self.tasks).await;
    }
}

#[derive(Clone)]
pub struct StatusEngine {
    ctx: Arc<EngineContext>,
    updates: mpsc::UnboundedSender<EngineUpdate>,
}

impl StatusEngine {
    pub fn new(ctx: Arc<EngineContext>, updates: mpsc::UnboundedSender<EngineUpdate>) -> Self {
        Self { ctx, updates }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Start all loops. The watch list is loaded once before the loops begin.
    pub async fn spawn(self) -> EngineHandle {
        self.reload_watch_list().await;

        let cancel = CancellationToken::new();
        let config = self.ctx.config().clone();
        let mut tasks = Vec::new();

        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.scheduler_tick, "scheduler", move || {
            let engine = engine.clone();
            async move {
                engine.schedule_tick().await;
            }
        }));
        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.aggregator_tick, "aggregator", move || {
            let engine = engine.clone();
            async move {
                engine.aggregate_pass().await;
            }
        }));
        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.detector_tick, "detector", move || {
            let engine = engine.clone();
            async move {
                engine.detect_pass().await;
            }
        }));
        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.command_tick, "commands", move || {
            let engine = engine.clone();
            async move {
                engine.command_pass().await;
            }
        }));
        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.request_tick, "requests", move || {
            let engine = engine.clone();
            async move {
                engine.request_pass().await;
            }
        }));
        let engine = self.clone();
        tasks.push(spawn_loop(cancel.clone(), config.visible_tick, "visible", move || {
            let engine = engine.clone();
            async move {
                engine.visible_pass().await;
            }
        }));
        let engine = self;
        tasks.push(spawn_loop(
            cancel.clone(),
            config.watch_reload_interval,
            "watch-reload",
            move || {
                let engine = engine.clone();
                async move {
                    engine.reload_watch_list().await;
                }
            },
        ));

        EngineHandle { cancel, tasks }
    }

    /// Re-resolve the watch list and install it if it changed.
    ///
    /// New repositories get their commit cursors and a root placeholder, which
    /// lets the aggregator discover the tree lazily.
    pub async fn reload_watch_list(&self) -> bool {
        let ctx = self.ctx.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            let paths = ctx.watch_source().paths()?;
            Ok::<_, crate::config::ConfigError>(resolve_watch_list(&paths, ctx.queries()))
        })
        .await;
        let new_set = match resolved {
            Ok(Ok(set)) => set,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read watch list");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Watch list task failed");
                return false;
            }
        };

        if new_set.same_as(&self.ctx.watch_set()) {
            return false;
        }
        let previous = self.ctx.replace_watch_set(new_set.clone());
        for uuid in new_set.removed_since(&previous) {
            let dropped = self.ctx.queue().discard_repository(uuid);
            tracing::info!(repo = %uuid, dropped, "Stopped watching repository");
        }
        // pending requests still carry the old root
        for repo in new_set.moved_since(&previous) {
            let dropped = self.ctx.queue().discard_repository(repo.uuid);
            tracing::info!(
                repo = %repo.uuid,
                path = %repo.path.display(),
                dropped,
                "Repository moved"
            );
        }
        self.ctx.detector().retain(&new_set.uuids());

        let added = new_set.added_since(&previous);
        let ctx = self.ctx.clone();
        let repositories = new_set.to_vec();
        let persisted = repositories.clone();
        let setup = tokio::task::spawn_blocking(move || {
            if let Err(e) = ctx.watched_store().replace_all(&persisted) {
                tracing::warn!(error = %e, "Failed to persist watch set");
            }
            for repo in &added {
                tracing::info!(repo = %repo.uuid, path = %repo.path.display(), "Watching repository");
                ctx.detector().commit_cursor_for(repo);
                if let Err(e) = ctx.statuses().invalidate(repo.uuid, repo_path::ROOT) {
                    tracing::warn!(repo = %repo.uuid, error = %e, "Failed to seed repository root");
                }
            }
        })
        .await;
        if let Err(e) = setup {
            tracing::warn!(error = %e, "Watch set setup task failed");
        }

        let _ = self
            .updates
            .send(EngineUpdate::WatchListChanged { repositories });
        true
    }

    /// One scheduler pass; returns the number of computations dispatched
    pub async fn schedule_tick(&self) -> usize {
        let ctx = self.ctx.clone();
        match tokio::task::spawn_blocking(move || ctx.queue().process_tick().len()).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                tracing::warn!(error = %e, "Scheduler tick failed");
                0
            }
        }
    }

    /// One aggregation pass over every watched repository
    pub async fn aggregate_pass(&self) -> Vec<(Uuid, AggregationReport)> {
        let mut reports = Vec::new();
        for repo in self.ctx.watch_set().to_vec() {
            let ctx = self.ctx.clone();
            let uuid = repo.uuid;
            match tokio::task::spawn_blocking(move || ctx.aggregator().run_pass(&repo)).await {
                Ok(Ok(report)) => reports.push((uuid, report)),
                Ok(Err(e)) => tracing::warn!(repo = %uuid, error = %e, "Aggregation pass failed"),
                Err(e) => tracing::warn!(repo = %uuid, error = %e, "Aggregation task failed"),
            }
        }
        reports
    }

    /// One change-detection pass; returns the number of requests queued
    pub async fn detect_pass(&self) -> usize {
        let mut queued = 0;
        for repo in self.ctx.watch_set().to_vec() {
            let ctx = self.ctx.clone();
            let uuid = repo.uuid;
            let result = tokio::task::spawn_blocking(move || {
                let paths = ctx.detector().advance_and_diff(&repo)?;
                for path in &paths {
                    ctx.queue()
                        .enqueue(path, &repo, Duration::ZERO, true, true, Priority::Low);
                }
                Ok::<_, super::change_detector::DetectorError>(paths.len())
            })
            .await;
            match result {
                Ok(Ok(count)) => queued += count,
                Ok(Err(e)) => tracing::warn!(repo = %uuid, error = %e, "Change detection failed"),
                Err(e) => tracing::warn!(repo = %uuid, error = %e, "Change detection task failed"),
            }
        }
        queued
    }

    /// Run pending user commands; returns the number that failed
    pub async fn command_pass(&self) -> usize {
        let mut failed = 0;
        for repo in self.ctx.watch_set().to_vec() {
            let ctx = self.ctx.clone();
            let uuid = repo.uuid;
            match tokio::task::spawn_blocking(move || ctx.commands().handle_pending(&repo)).await {
                Ok(Ok(failures)) => {
                    failed += failures.len();
                    for failure in failures {
                        let _ = self.updates.send(EngineUpdate::CommandFailed {
                            repo: failure.repo,
                            path: failure.path,
                            title: failure.title,
                            message: failure.message,
                        });
                    }
                }
                Ok(Err(e)) => tracing::warn!(repo = %uuid, error = %e, "Failed to read command requests"),
                Err(e) => tracing::warn!(repo = %uuid, error = %e, "Command task failed"),
            }
        }
        failed
    }

    /// Queue statuses a front end asked for and has not got; returns the
    /// number queued
    pub async fn request_pass(&self) -> usize {
        let mut queued = 0;
        for repo in self.ctx.watch_set().to_vec() {
            let ctx = self.ctx.clone();
            let uuid = repo.uuid;
            match tokio::task::spawn_blocking(move || ctx.requested().queue_unanswered(&repo)).await {
                Ok(Ok(count)) => queued += count,
                Ok(Err(e)) => tracing::warn!(repo = %uuid, error = %e, "Failed to read status requests"),
                Err(e) => tracing::warn!(repo = %uuid, error = %e, "Status request task failed"),
            }
        }
        queued
    }

    /// Queue rescans of stale visible paths; returns the number queued
    pub async fn visible_pass(&self) -> usize {
        let mut queued = 0;
        for repo in self.ctx.watch_set().to_vec() {
            let ctx = self.ctx.clone();
            let uuid = repo.uuid;
            match tokio::task::spawn_blocking(move || ctx.visible().rescan(&repo)).await {
                Ok(Ok(count)) => queued += count,
                Ok(Err(e)) => tracing::warn!(repo = %uuid, error = %e, "Visible rescan failed"),
                Err(e) => tracing::warn!(repo = %uuid, error = %e, "Visible rescan task failed"),
            }
        }
        queued
    }
}

fn spawn_loop<F, Fut>(
    cancel: CancellationToken,
    period: Duration,
    name: &'static str,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => pass().await,
            }
        }
        tracing::debug!(task = name, "Engine loop stopped");
    })
}
