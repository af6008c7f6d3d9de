//! Commit cursors and the paths they feed to the scheduler

use std::time::Duration;

use annex_watch::core::Priority;

use super::common::fixtures::{TestAnnex, TestEngine};

fn location_log(key: &str) -> String {
    format!("1a2/3b4/{key}.log")
}

#[tokio::test]
async fn test_primary_commit_queues_changed_paths() {
    let annex = TestAnnex::new();
    annex.annexed("photos/a.jpg", 1, true);
    annex.fake.set_head("HEAD", "c1");
    annex.fake.set_head("git-annex", "m1");
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    assert_eq!(env.engine.detect_pass().await, 0);

    annex.fake.set_head("HEAD", "c2");
    annex
        .fake
        .set_log("c1", "c2", &["photos/a.jpg", "", "docs/read me.md"]);
    assert_eq!(env.engine.detect_pass().await, 2);

    let queue = env.ctx.queue();
    assert!(queue.is_queued(annex.uuid, "photos/a.jpg"));
    assert!(queue.is_queued(annex.uuid, "docs/read me.md"));
    assert_eq!(queue.pending(Priority::Low), 2);

    let cursor = env.ctx.detector().commit_cursor_for(&annex.repo());
    assert_eq!(cursor.primary.as_deref(), Some("c2"));
    assert_eq!(cursor.metadata.as_deref(), Some("m1"));

    assert_eq!(env.engine.detect_pass().await, 0);
}

#[tokio::test]
async fn test_location_change_resolves_keys_to_paths() {
    let annex = TestAnnex::new();
    let key = annex.annexed("a.jpg", 1, false);
    annex.fake.set_head("git-annex", "m1");
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    env.ctx
        .queue()
        .enqueue("a.jpg", &annex.repo(), Duration::ZERO, true, true, Priority::Low);
    env.drain().await;

    annex.fake.set_head("git-annex", "m2");
    annex
        .fake
        .set_log("m1", "m2", &[location_log(&key).as_str(), "uuid.log"]);
    assert_eq!(env.engine.detect_pass().await, 1);
    assert!(env.ctx.queue().is_queued(annex.uuid, "a.jpg"));
}

#[tokio::test]
async fn test_unknown_key_rechecks_untracked_paths() {
    let annex = TestAnnex::new();
    let key = annex.annexed("a.jpg", 1, true);
    annex.plain("incoming/new.bin");
    annex.fake.set_head("git-annex", "m1");
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    let repo = annex.repo();
    for path in ["a.jpg", "incoming/new.bin"] {
        env.ctx
            .queue()
            .enqueue(path, &repo, Duration::ZERO, true, true, Priority::Low);
    }
    env.drain().await;
    assert!(!env.get(&annex, "incoming/new.bin").unwrap().is_tracked);

    annex.fake.set_head("git-annex", "m2");
    annex.fake.set_log(
        "m1",
        "m2",
        &[
            location_log(&key).as_str(),
            location_log("SHA256E-s9--unknown").as_str(),
        ],
    );
    assert_eq!(env.engine.detect_pass().await, 2);
    assert!(env.ctx.queue().is_queued(annex.uuid, "a.jpg"));
    assert!(env.ctx.queue().is_queued(annex.uuid, "incoming/new.bin"));
}

#[tokio::test]
async fn test_repository_without_commits() {
    let annex = TestAnnex::new();
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    assert_eq!(env.engine.detect_pass().await, 0);
    let cursor = env.ctx.detector().commit_cursor_for(&annex.repo());
    assert!(cursor.primary.is_none() && cursor.metadata.is_none());

    // the first commit only sets the cursor
    annex.fake.set_head("HEAD", "c1");
    assert_eq!(env.engine.detect_pass().await, 0);

    annex.plain("first.txt");
    annex.fake.set_head("HEAD", "c2");
    annex.fake.set_log("c1", "c2", &["first.txt"]);
    assert_eq!(env.engine.detect_pass().await, 1);
}

#[tokio::test]
async fn test_failed_head_read_leaves_cursor_in_place() {
    let annex = TestAnnex::new();
    annex.fake.set_head("HEAD", "c1");
    annex.fake.set_head("git-annex", "m1");
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;

    annex.fake.set_head("HEAD", "c2");
    annex.fake.set_log("c1", "c2", &["changed.txt"]);
    annex
        .fake
        .fail_head("git-annex", "fatal: bad object refs/heads/git-annex");
    assert_eq!(env.engine.detect_pass().await, 0);
    let cursor = env.ctx.detector().commit_cursor_for(&annex.repo());
    assert_eq!(cursor.primary.as_deref(), Some("c1"));

    // the next pass sees the same range again
    annex.fake.set_head("git-annex", "m1");
    assert_eq!(env.engine.detect_pass().await, 1);
    assert!(env.ctx.queue().is_queued(annex.uuid, "changed.txt"));
}

#[tokio::test]
async fn test_unreadable_range_resets_cursor_and_rechecks_root() {
    let annex = TestAnnex::new();
    annex.annexed("a.jpg", 1, true);
    annex.fake.set_head("HEAD", "c1");
    annex.fake.set_head("git-annex", "m1");
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;
    env.converge(&annex).await;
    assert_eq!(env.engine.detect_pass().await, 0);

    // c1 was rewritten away
    annex.fake.set_head("HEAD", "c9");
    annex
        .fake
        .fail_log("c1", "c9", "fatal: Invalid revision range c1..c9");
    assert_eq!(env.engine.detect_pass().await, 0);

    let cursor = env.ctx.detector().commit_cursor_for(&annex.repo());
    assert_eq!(cursor.primary.as_deref(), Some("c9"));
    assert_eq!(cursor.metadata.as_deref(), Some("m1"));
    assert!(env.get(&annex, ".").unwrap().needs_update);

    // detection carries on from the new head
    annex.fake.set_head("HEAD", "c10");
    annex.fake.set_log("c9", "c10", &["a.jpg"]);
    assert_eq!(env.engine.detect_pass().await, 1);
    assert!(env.ctx.queue().is_queued(annex.uuid, "a.jpg"));
}
