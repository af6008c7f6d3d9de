//! Watch-list reloads, user commands and the running loops

use std::fs;
use std::time::Duration;

use annex_watch::config::{add_watched_repository, remove_watched_repository};
use annex_watch::core::{EngineUpdate, Priority, WatchSource};
use annex_watch::data::{
    CommandRequestStore, EnoughCopies, PresentStatus, StatusRequestStore, VisibleFolderStore,
    WatchedRepositoryStore,
};
use annex_watch::git::{AnnexAction, CommandOutput, GitAction, UserCommand};
use tempfile::TempDir;

use super::common::fixtures::{fast_config, TestAnnex, TestEngine};

#[tokio::test]
async fn test_reload_installs_and_removes_repositories() {
    let annex = TestAnnex::new();
    let config_dir = TempDir::new().unwrap();
    let config_file = config_dir.path().join("config.toml");
    fs::write(&config_file, "[watch]\nrepositories = []\n").unwrap();

    let mut env = TestEngine::with_source(
        &annex,
        Default::default(),
        WatchSource::ConfigFile(config_file.clone()),
    );
    assert!(!env.engine.reload_watch_list().await);
    assert!(env.ctx.watch_set().is_empty());

    assert!(add_watched_repository(&config_file, &annex.path).unwrap());
    assert!(env.engine.reload_watch_list().await);
    assert_eq!(env.ctx.watch_set().len(), 1);
    match env.updates.try_recv().unwrap() {
        EngineUpdate::WatchListChanged { repositories } => {
            assert_eq!(repositories, vec![annex.repo()]);
        }
        other => panic!("unexpected update {other:?}"),
    }

    // seeded root and persisted set
    let root = env.get(&annex, ".").unwrap();
    assert!(root.needs_update && root.is_dir);
    let store = WatchedRepositoryStore::new(env.database.connection());
    assert_eq!(store.list().unwrap(), vec![annex.repo()]);

    // unchanged list is a no-op
    assert!(!env.engine.reload_watch_list().await);
    assert!(env.updates.try_recv().is_err());

    env.ctx
        .queue()
        .enqueue("x", &annex.repo(), Duration::ZERO, true, true, Priority::Low);
    assert!(remove_watched_repository(&config_file, &annex.path).unwrap());
    assert!(env.engine.reload_watch_list().await);
    assert!(env.ctx.watch_set().is_empty());
    assert!(env.ctx.queue().is_idle());
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_moved_repository_drops_requests_for_old_root() {
    let annex = TestAnnex::new();
    annex.annexed("a.jpg", 1, true);
    let config_dir = TempDir::new().unwrap();
    let config_file = config_dir.path().join("config.toml");
    let new_home = config_dir.path().join("moved");
    fs::create_dir_all(&new_home).unwrap();
    let new_home = new_home.canonicalize().unwrap();
    fs::write(&config_file, "[watch]\nrepositories = []\n").unwrap();
    add_watched_repository(&config_file, &annex.path).unwrap();

    let mut env = TestEngine::with_source(
        &annex,
        Default::default(),
        WatchSource::ConfigFile(config_file.clone()),
    );
    assert!(env.engine.reload_watch_list().await);
    env.updates.try_recv().unwrap();
    env.ctx
        .queue()
        .enqueue("a.jpg", &annex.repo(), Duration::ZERO, true, true, Priority::High);

    remove_watched_repository(&config_file, &annex.path).unwrap();
    add_watched_repository(&config_file, &new_home).unwrap();
    assert!(env.engine.reload_watch_list().await);

    assert!(env.ctx.queue().is_idle());
    let watched = env.ctx.watch_set().to_vec();
    assert_eq!(watched.len(), 1);
    assert_eq!(watched[0].uuid, annex.uuid);
    assert_eq!(watched[0].path, new_home);
    assert!(matches!(
        env.updates.try_recv().unwrap(),
        EngineUpdate::WatchListChanged { .. }
    ));
}

#[tokio::test]
async fn test_paths_without_uuid_are_skipped() {
    let annex = TestAnnex::new();
    let missing = annex.path.join("does-not-exist");
    let env = TestEngine::with_source(
        &annex,
        Default::default(),
        WatchSource::Fixed(vec![missing, annex.path.clone(), annex.path.clone()]),
    );
    assert!(env.engine.reload_watch_list().await);
    assert_eq!(env.ctx.watch_set().len(), 1);
}

#[tokio::test]
async fn test_successful_command_refreshes_at_high_priority() {
    let annex = TestAnnex::new();
    annex.annexed("a.jpg", 1, false);
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;
    let repo = annex.repo();

    env.ctx
        .queue()
        .enqueue("a.jpg", &repo, Duration::ZERO, true, true, Priority::Low);
    env.drain().await;
    assert_eq!(
        env.get(&annex, "a.jpg").unwrap().present,
        Some(PresentStatus::Absent)
    );

    let requests = CommandRequestStore::new(env.database.connection());
    requests
        .enqueue(annex.uuid, "a.jpg", UserCommand::Annex(AnnexAction::Get))
        .unwrap();
    assert_eq!(env.engine.command_pass().await, 0);
    assert_eq!(requests.pending_count().unwrap(), 0);
    assert_eq!(annex.fake.calls("get"), 1);
    assert_eq!(env.ctx.queue().pending(Priority::High), 1);

    env.drain().await;
    assert_eq!(
        env.get(&annex, "a.jpg").unwrap().present,
        Some(PresentStatus::Present)
    );
}

#[tokio::test]
async fn test_failed_command_reports_tool_text() {
    let annex = TestAnnex::new();
    annex.annexed("a.jpg", 1, false);
    annex.plain("notes.md");
    annex.fake.script_user_command(
        "get",
        CommandOutput {
            success: false,
            output: vec!["get a.jpg (not available)".into(), "failed".into()],
            error: vec!["git-annex: get: 1 failed".into()],
        },
    );
    annex
        .fake
        .script_user_command("git-add", CommandOutput::failure(Vec::<String>::new()));
    let mut env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;
    env.updates.try_recv().unwrap();

    let requests = CommandRequestStore::new(env.database.connection());
    requests
        .enqueue(annex.uuid, "a.jpg", UserCommand::Annex(AnnexAction::Get))
        .unwrap();
    requests
        .enqueue(annex.uuid, "notes.md", UserCommand::Git(GitAction::Add))
        .unwrap();
    assert_eq!(env.engine.command_pass().await, 2);
    assert_eq!(env.ctx.queue().pending(Priority::High), 0);

    match env.updates.try_recv().unwrap() {
        EngineUpdate::CommandFailed {
            repo,
            path,
            title,
            message,
        } => {
            assert_eq!(repo, annex.uuid);
            assert_eq!(path, "a.jpg");
            assert_eq!(title, "git-annex: get: 1 failed");
            assert_eq!(message, "get a.jpg (not available)\nfailed");
        }
        other => panic!("unexpected update {other:?}"),
    }
    match env.updates.try_recv().unwrap() {
        EngineUpdate::CommandFailed { path, title, .. } => {
            assert_eq!(path, "notes.md");
            assert_eq!(title, "git: error");
        }
        other => panic!("unexpected update {other:?}"),
    }
}

#[tokio::test]
async fn test_requested_statuses_are_computed_first() {
    let annex = TestAnnex::new();
    annex.annexed("photos/a.jpg", 2, true);
    annex.annexed("photos/b.jpg", 1, false);
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    let requests = StatusRequestStore::new(env.database.connection());
    requests.request(annex.uuid, "photos/a.jpg").unwrap();
    requests.request(annex.uuid, "gone.jpg").unwrap();
    assert_eq!(env.engine.request_pass().await, 1);
    assert_eq!(env.ctx.queue().pending(Priority::High), 1);
    assert!(!env.ctx.queue().is_queued(annex.uuid, "photos/b.jpg"));

    // still unanswered, already queued
    assert_eq!(env.engine.request_pass().await, 0);

    env.drain().await;
    let record = env.get(&annex, "photos/a.jpg").unwrap();
    assert_eq!(record.present, Some(PresentStatus::Present));
    assert_eq!(record.number_of_copies, Some(2));
    assert!(env.get(&annex, "photos/b.jpg").is_none());

    assert_eq!(env.engine.request_pass().await, 0);
    assert!(requests.unanswered(annex.uuid).unwrap().is_empty());
}

#[tokio::test]
async fn test_visible_folders_get_rescanned() {
    let annex = TestAnnex::new();
    annex.annexed("photos/a.jpg", 1, true);
    annex.annexed("music/b.mp3", 1, true);
    let env = TestEngine::with_config(
        &annex,
        annex_watch::config::EngineConfig {
            visible_rescan_staleness: Duration::ZERO,
            ..Default::default()
        },
    );
    env.engine.reload_watch_list().await;
    let repo = annex.repo();
    for path in ["photos/a.jpg", "music/b.mp3"] {
        env.ctx
            .queue()
            .enqueue(path, &repo, Duration::ZERO, true, true, Priority::Low);
    }
    env.drain().await;
    assert_eq!(env.engine.visible_pass().await, 0);

    VisibleFolderStore::new(env.database.connection())
        .add(annex.uuid, "photos")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let queued = env.engine.visible_pass().await;
    assert!(queued >= 1);
    assert!(env.ctx.queue().is_queued(annex.uuid, "photos/a.jpg"));
    assert!(!env.ctx.queue().is_queued(annex.uuid, "music/b.mp3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_engine_converges_and_shuts_down() {
    let annex = TestAnnex::new();
    annex.fake.set_numcopies(2);
    annex.annexed("a.jpg", 2, true);
    annex.annexed("photos/b.jpg", 3, true);
    let mut env = TestEngine::with_config(&annex, fast_config());

    let handle = env.engine.clone().spawn().await;
    assert!(matches!(
        env.updates.recv().await,
        Some(EngineUpdate::WatchListChanged { .. })
    ));

    let root = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(root) = env.get(&annex, ".").filter(|r| r.is_resolved()) {
                return root;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("engine did not converge");
    assert_eq!(root.present, Some(PresentStatus::Present));
    assert_eq!(root.enough_copies, Some(EnoughCopies::Enough));
    assert_eq!(root.number_of_copies, Some(2));

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("engine did not stop");
}
