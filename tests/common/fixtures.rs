//! Repository and engine fixtures
//!
//! [`TestAnnex`] is a temporary working tree whose git-annex answers come
//! from a [`FakeAnnex`]. [`TestEngine`] wires a real engine (SQLite store,
//! scheduler, aggregator, detector) to it.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use annex_watch::config::EngineConfig;
use annex_watch::core::{EngineContext, EngineUpdate, StatusEngine, WatchSource};
use annex_watch::data::{Database, StatusRecord, WatchedRepository};
use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::fake_annex::FakeAnnex;

pub struct TestAnnex {
    _dir: TempDir,
    pub path: PathBuf,
    pub uuid: Uuid,
    pub fake: Arc<FakeAnnex>,
}

impl TestAnnex {
    /// An empty working tree with a `.git` directory
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp dir");
        fs::create_dir_all(path.join(".git")).unwrap();
        let uuid = Uuid::new_v4();
        Self {
            _dir: dir,
            path,
            uuid,
            fake: Arc::new(FakeAnnex::new(uuid)),
        }
    }

    pub fn repo(&self) -> WatchedRepository {
        WatchedRepository::new(self.uuid, self.path.clone())
    }

    pub fn dir(&self, relative: &str) {
        fs::create_dir_all(self.path.join(relative)).unwrap();
    }

    /// An annexed file; the key is derived from the path
    pub fn annexed(&self, relative: &str, copies: u32, here: bool) -> String {
        self.write(relative);
        let key = Self::key_for(relative);
        self.fake.add_file(relative, &key, copies, here);
        key
    }

    /// A file git-annex does not manage
    pub fn plain(&self, relative: &str) {
        self.write(relative);
    }

    pub fn remove(&self, relative: &str) {
        let path = self.path.join(relative);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
        self.fake.forget_file(relative);
    }

    pub fn key_for(relative: &str) -> String {
        format!("SHA256E-s4--{}", relative.replace('/', "_"))
    }

    fn write(&self, relative: &str) {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "data").unwrap();
    }
}

/// Engine config with short ticks for loop tests
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        scheduler_tick: Duration::from_millis(10),
        aggregator_tick: Duration::from_millis(10),
        detector_tick: Duration::from_millis(10),
        command_tick: Duration::from_millis(10),
        visible_tick: Duration::from_millis(10),
        request_tick: Duration::from_millis(10),
        watch_reload_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

pub struct TestEngine {
    _data: TempDir,
    pub database: Database,
    pub ctx: Arc<EngineContext>,
    pub engine: StatusEngine,
    pub updates: mpsc::UnboundedReceiver<EngineUpdate>,
}

impl TestEngine {
    pub fn new(annex: &TestAnnex) -> Self {
        Self::with_config(annex, EngineConfig::default())
    }

    pub fn with_config(annex: &TestAnnex, config: EngineConfig) -> Self {
        Self::with_source(
            annex,
            config,
            WatchSource::Fixed(vec![annex.path.clone()]),
        )
    }

    pub fn with_source(annex: &TestAnnex, config: EngineConfig, source: WatchSource) -> Self {
        let data = TempDir::new().expect("Failed to create temp dir");
        let database =
            Database::open(data.path().join("status.db")).expect("Failed to open database");
        let ctx = Arc::new(EngineContext::new(
            config,
            source,
            annex.fake.clone(),
            &database,
        ));
        let (update_tx, updates) = mpsc::unbounded_channel();
        let engine = StatusEngine::new(ctx.clone(), update_tx);
        Self {
            _data: data,
            database,
            ctx,
            engine,
            updates,
        }
    }

    /// Dispatch scheduler ticks until nothing more can start, awaiting every
    /// computation
    pub async fn drain(&self) {
        loop {
            let handles = self.ctx.queue().process_tick();
            if handles.is_empty() {
                break;
            }
            join_all(handles).await;
        }
    }

    /// Alternate scheduler and aggregator until the root is resolved
    pub async fn converge(&self, annex: &TestAnnex) -> StatusRecord {
        for _ in 0..50 {
            self.drain().await;
            self.engine.aggregate_pass().await;
            self.drain().await;
            if let Some(root) = self.get(annex, ".") {
                if root.is_resolved() && self.ctx.queue().is_idle() {
                    return root;
                }
            }
        }
        panic!("status did not converge");
    }

    pub fn get(&self, annex: &TestAnnex, path: &str) -> Option<StatusRecord> {
        self.ctx.statuses().get(annex.uuid, path).unwrap()
    }
}
