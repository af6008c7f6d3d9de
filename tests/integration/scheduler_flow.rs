//! Scheduler behaviour: capacity, duplicates, freshness and tier rules

use std::time::Duration;

use annex_watch::core::Priority;
use annex_watch::data::{EnoughCopies, PresentStatus, WatchedRepository};
use futures::future::join_all;

use super::common::fixtures::{TestAnnex, TestEngine};

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("f{i:02}.bin")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_low_tier_respects_capacity() {
    let annex = TestAnnex::new();
    let files = names(12);
    for file in &files {
        annex.annexed(file, 1, true);
    }
    annex.fake.set_delay(Duration::from_millis(300));
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    for file in &files {
        queue.enqueue(file, &repo, Duration::ZERO, true, true, Priority::Low);
    }

    let handles = queue.process_tick();
    assert_eq!(handles.len(), 5);
    assert_eq!(queue.in_flight_count(annex.uuid), 5);
    assert_eq!(queue.pending(Priority::Low), 7);

    // slots are full until the first batch finishes
    assert!(queue.process_tick().is_empty());
    join_all(handles).await;
    assert_eq!(queue.in_flight_count(annex.uuid), 0);

    env.drain().await;
    assert!(annex.fake.max_concurrent() <= 5);
    for file in &files {
        assert!(env.get(&annex, file).is_some(), "missing status for {file}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_high_tier_fills_first_and_blocks_low() {
    let annex = TestAnnex::new();
    let files = names(15);
    for file in &files {
        annex.annexed(file, 1, true);
    }
    annex.fake.set_delay(Duration::from_millis(300));
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    for file in &files[..12] {
        queue.enqueue(file, &repo, Duration::ZERO, true, true, Priority::High);
    }
    for file in &files[12..] {
        queue.enqueue(file, &repo, Duration::ZERO, true, true, Priority::Low);
    }

    let handles = queue.process_tick();
    assert_eq!(handles.len(), 10);
    assert_eq!(queue.pending(Priority::High), 2);
    assert_eq!(queue.pending(Priority::Low), 3);

    join_all(handles).await;
    env.drain().await;
    assert!(annex.fake.max_concurrent() <= 10);
    assert!(queue.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicates_high_waits_low_dropped() {
    let annex = TestAnnex::new();
    annex.annexed("a.bin", 2, true);
    annex.fake.set_delay(Duration::from_millis(300));
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::High);
    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::High);
    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::Low);

    let handles = queue.process_tick();
    assert_eq!(handles.len(), 1);
    assert_eq!(queue.pending(Priority::High), 1, "high duplicate waits");
    assert_eq!(queue.pending(Priority::Low), 0, "low duplicate is dropped");
    assert!(queue.is_queued(annex.uuid, "a.bin"));

    join_all(handles).await;
    let handles = queue.process_tick();
    assert_eq!(handles.len(), 1);
    join_all(handles).await;

    assert_eq!(annex.fake.calls("whereis"), 2);
    assert_eq!(annex.fake.max_concurrent_per_path(), 1);
    assert!(queue.is_idle());
}

#[tokio::test]
async fn test_fresh_record_satisfies_request() {
    let annex = TestAnnex::new();
    annex.annexed("a.bin", 1, true);
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::Low);
    env.drain().await;
    assert_eq!(annex.fake.calls("whereis"), 1);

    queue.enqueue("a.bin", &repo, Duration::from_secs(60), true, true, Priority::Low);
    assert!(queue.process_tick().is_empty());
    assert_eq!(queue.pending(Priority::Low), 0);
    assert_eq!(annex.fake.calls("whereis"), 1);

    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::High);
    env.drain().await;
    assert_eq!(annex.fake.calls("whereis"), 2);
}

#[tokio::test]
async fn test_directory_requests_are_low_priority() {
    let annex = TestAnnex::new();
    annex.dir("photos");
    let env = TestEngine::new(&annex);
    let queue = env.ctx.queue();

    queue.enqueue("photos", &annex.repo(), Duration::ZERO, true, true, Priority::High);
    assert_eq!(queue.pending(Priority::High), 0);
    assert_eq!(queue.pending(Priority::Low), 1);
}

#[tokio::test]
async fn test_file_status_and_parent_invalidation() {
    let annex = TestAnnex::new();
    annex.fake.set_numcopies(2);
    let key = annex.annexed("photos/a.jpg", 1, false);
    annex.plain("photos/notes.txt");
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    queue.enqueue("photos/a.jpg", &repo, Duration::ZERO, true, true, Priority::High);
    queue.enqueue("photos/notes.txt", &repo, Duration::ZERO, true, true, Priority::High);
    env.drain().await;

    let record = env.get(&annex, "photos/a.jpg").unwrap();
    assert!(record.is_tracked);
    assert_eq!(record.present, Some(PresentStatus::Absent));
    assert_eq!(
        record.enough_copies,
        Some(EnoughCopies::Lacking)
    );
    assert_eq!(record.number_of_copies, Some(1));
    assert_eq!(record.content_key.as_deref(), Some(key.as_str()));

    let notes = env.get(&annex, "photos/notes.txt").unwrap();
    assert!(!notes.is_tracked);

    let parent = env.get(&annex, "photos").unwrap();
    assert!(parent.is_dir);
    assert!(parent.needs_update);
}

#[tokio::test]
async fn test_single_local_copy_below_numcopies_is_present_but_lacking() {
    let annex = TestAnnex::new();
    annex.fake.set_numcopies(2);
    annex.annexed("a.jpg", 1, true);
    let env = TestEngine::new(&annex);

    env.ctx
        .queue()
        .enqueue("a.jpg", &annex.repo(), Duration::ZERO, true, true, Priority::High);
    env.drain().await;

    let record = env.get(&annex, "a.jpg").unwrap();
    assert_eq!(record.present, Some(PresentStatus::Present));
    assert_eq!(record.enough_copies, Some(EnoughCopies::Lacking));
    assert_eq!(record.number_of_copies, Some(1));
}

#[tokio::test]
async fn test_vanished_file_is_removed() {
    let annex = TestAnnex::new();
    annex.annexed("photos/a.jpg", 1, true);
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    queue.enqueue("photos/a.jpg", &repo, Duration::ZERO, true, true, Priority::Low);
    env.drain().await;
    assert!(env.get(&annex, "photos/a.jpg").is_some());

    annex.remove("photos/a.jpg");
    queue.enqueue("photos/a.jpg", &repo, Duration::ZERO, true, true, Priority::Low);
    env.drain().await;
    assert!(env.get(&annex, "photos/a.jpg").is_none());
    assert!(env.get(&annex, "photos").unwrap().needs_update);
}

#[tokio::test]
async fn test_discard_repository_drops_pending() {
    let annex = TestAnnex::new();
    annex.annexed("a.bin", 1, true);
    annex.annexed("b.bin", 1, true);
    let env = TestEngine::new(&annex);
    let repo = annex.repo();
    let queue = env.ctx.queue();

    queue.enqueue("a.bin", &repo, Duration::ZERO, true, true, Priority::High);
    queue.enqueue("b.bin", &repo, Duration::ZERO, true, true, Priority::Low);
    assert_eq!(queue.discard_repository(annex.uuid), 2);
    assert!(queue.is_idle());
}

#[tokio::test]
async fn test_missing_repository_root_keeps_records() {
    let annex = TestAnnex::new();
    annex.annexed("a.jpg", 1, true);
    annex.annexed("d/b.jpg", 1, true);
    let env = TestEngine::new(&annex);
    env.engine.reload_watch_list().await;
    env.converge(&annex).await;
    let whereis_calls = annex.fake.calls("whereis");

    let unmounted = WatchedRepository::new(annex.uuid, annex.path.join("unmounted-volume"));
    let queue = env.ctx.queue();
    for path in [".", "a.jpg", "d/b.jpg"] {
        queue.enqueue(path, &unmounted, Duration::ZERO, true, true, Priority::High);
    }
    env.drain().await;

    assert!(queue.is_idle());
    assert_eq!(annex.fake.calls("whereis"), whereis_calls);
    assert!(env.get(&annex, "a.jpg").is_some());
    assert!(env.get(&annex, "d/b.jpg").is_some());
    assert!(env.get(&annex, ".").unwrap().is_resolved());
}
