//! Integration tests for seedling
//!
//! These tests drive full session lifecycles through the engine:
//! admission, pause/resume, stop and re-queue, artifact
//! materialization, and watch-directory ingestion. The aggregator tick
//! is called manually for deterministic scheduling.

use seedling::{
    AddTorrentOptions, EngineConfig, EngineError, SessionEngine, SessionEvent, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Build .torrent bytes for a single-file torrent of the given size
fn make_torrent(name: &str, length: u64) -> Vec<u8> {
    let piece_length = 32768u64;
    let num_pieces = length.div_ceil(piece_length);
    let pieces = vec![0u8; (num_pieces * 20) as usize];
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:infod");
    data.extend_from_slice(format!("6:lengthi{}e", length).as_bytes());
    data.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
    data.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    data.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    data.extend_from_slice(&pieces);
    data.extend_from_slice(b"ee");
    data
}

/// Route engine logs through the test harness
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Helper to create a test engine with a temp directory
///
/// The background tick interval is set far out so tests control
/// scheduling by calling `tick()` themselves.
fn create_test_engine(temp_dir: &TempDir, steps: u32, step_ms: u64) -> Arc<SessionEngine> {
    init_tracing();
    let config = EngineConfig::new()
        .download_dir(temp_dir.path())
        .max_active_downloads(2)
        .transfer_steps(steps)
        .step_interval_ms(step_ms)
        .pause_poll_interval_ms(5)
        .tick_interval_ms(3_600_000);
    SessionEngine::new(config).expect("Failed to create engine")
}

/// Helper to wait for a specific event type
async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    predicate: F,
    timeout_duration: Duration,
) -> Option<SessionEvent>
where
    F: Fn(&SessionEvent) -> bool,
{
    let result = timeout(timeout_duration, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;
    result.unwrap_or(None)
}

// =============================================================================
// Basic Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_add_creates_idle_session() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);

    let data = make_torrent("example.iso", 4096);
    let id = engine
        .add_torrent(&data, AddTorrentOptions::default())
        .expect("Failed to add torrent");

    let status = engine.status(id).expect("Should have status");
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.name, "example.iso");
    assert_eq!(status.total_size, 4096);
    assert_eq!(status.downloaded, 0);
    assert_eq!(status.queue_position, None);

    // Same bytes map to the same id
    let again = engine
        .add_torrent(&data, AddTorrentOptions::default())
        .expect("Failed to re-add torrent");
    assert_eq!(again, id);
    assert_eq!(engine.list().len(), 1);
}

#[tokio::test]
async fn test_malformed_torrent_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);

    let result = engine.add_torrent(b"not bencode at all", AddTorrentOptions::default());
    assert!(matches!(result, Err(EngineError::Parse { .. })));

    // Valid bencode that is not a torrent
    let result = engine.add_torrent(b"i42e", AddTorrentOptions::default());
    assert!(matches!(result, Err(EngineError::Metadata { .. })));
    assert!(engine.list().is_empty());
}

#[tokio::test]
async fn test_full_download_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);
    let mut events = engine.subscribe();

    let data = make_torrent("movie.mkv", 2000);
    let id = engine
        .add_torrent(&data, AddTorrentOptions::default())
        .expect("Failed to add torrent");
    assert!(engine.enqueue_start(id).expect("Failed to enqueue"));
    assert_eq!(engine.status(id).unwrap().state, SessionState::Queued);

    engine.tick().await;

    let completed = wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await;
    assert!(completed.is_some(), "Session should complete");

    let status = engine.status(id).expect("Should have status");
    assert_eq!(status.state, SessionState::Completed);
    assert_eq!(status.downloaded, 2000);
    assert_eq!(status.progress, 100.0);
    assert!(status.completed_at.is_some());

    // The artifact is a zero-filled placeholder of the declared size
    let folder = temp_dir.path().join(format!("movie.mkv-{}", id));
    let artifact = folder.join("movie.mkv");
    assert!(artifact.exists(), "Artifact file should exist");
    assert_eq!(std::fs::metadata(&artifact).unwrap().len(), 2000);

    engine.shutdown();
}

#[tokio::test]
async fn test_progress_events_are_emitted() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);
    let mut events = engine.subscribe();

    let data = make_torrent("file.bin", 400);
    let id = engine
        .add_torrent(
            &data,
            AddTorrentOptions {
                start: true,
                ..AddTorrentOptions::default()
            },
        )
        .expect("Failed to add torrent");
    engine.tick().await;

    // Steps advance downloaded in equal increments of total/steps
    let progress = wait_for_event(
        &mut events,
        |e| {
            matches!(e, SessionEvent::Progress { id: eid, downloaded, total }
                if *eid == id && *downloaded == 100 && *total == 400)
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(progress.is_some(), "Should see the first quarter step");
}

// =============================================================================
// Admission Control Tests
// =============================================================================

#[tokio::test]
async fn test_admission_limit_and_promotion() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 50, 10);
    let mut events = engine.subscribe();

    let mut ids = Vec::new();
    for i in 0..5 {
        let data = make_torrent(&format!("t{}.bin", i), 500);
        let id = engine
            .add_torrent(&data, AddTorrentOptions::default())
            .expect("Failed to add torrent");
        engine.enqueue_start(id).expect("Failed to enqueue");
        ids.push(id);
    }

    engine.tick().await;

    // Two slots, so the remaining three wait in enqueue order
    let downloading = engine
        .list()
        .iter()
        .filter(|s| s.state == SessionState::Downloading)
        .count();
    assert_eq!(downloading, 2);
    for (i, id) in ids[2..].iter().enumerate() {
        assert_eq!(engine.status(*id).unwrap().state, SessionState::Queued);
        assert_eq!(engine.status(*id).unwrap().queue_position, Some(i + 1));
    }

    // When a slot frees up, the next sweep promotes the waiter
    let first_done = wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { .. }),
        Duration::from_secs(10),
    )
    .await;
    assert!(first_done.is_some());

    engine.tick().await;
    let third = engine.status(ids[2]).unwrap();
    assert_ne!(third.state, SessionState::Queued);
    assert_eq!(third.queue_position, None);

    engine.shutdown();
}

#[tokio::test]
async fn test_raising_limit_admits_more() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 100, 10);

    let mut ids = Vec::new();
    for i in 0..4 {
        let data = make_torrent(&format!("r{}.bin", i), 500);
        let id = engine
            .add_torrent(&data, AddTorrentOptions::default())
            .expect("Failed to add torrent");
        engine.enqueue_start(id).expect("Failed to enqueue");
        ids.push(id);
    }
    engine.tick().await;
    assert_eq!(engine.status(ids[3]).unwrap().queue_position, Some(2));

    engine.set_max_active_downloads(4);
    engine.tick().await;

    let downloading = engine
        .list()
        .iter()
        .filter(|s| s.state == SessionState::Downloading)
        .count();
    assert_eq!(downloading, 4);

    engine.shutdown();
}

// =============================================================================
// Pause / Resume / Stop Tests
// =============================================================================

#[tokio::test]
async fn test_pause_and_resume() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 100, 10);
    let mut events = engine.subscribe();

    let data = make_torrent("paused.bin", 10000);
    let id = engine
        .add_torrent(
            &data,
            AddTorrentOptions {
                start: true,
                ..AddTorrentOptions::default()
            },
        )
        .expect("Failed to add torrent");
    engine.tick().await;

    wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Progress { id: eid, .. } if *eid == id),
        Duration::from_secs(10),
    )
    .await
    .expect("Should make progress");

    assert!(engine.pause(id).expect("Failed to pause"));
    assert_eq!(engine.status(id).unwrap().state, SessionState::Paused);
    // Pausing twice is a legal no-op
    assert!(!engine.pause(id).unwrap());

    // Progress holds while paused
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frozen = engine.status(id).unwrap().downloaded;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.status(id).unwrap().downloaded, frozen);
    assert!(frozen < 10000);

    assert!(engine.resume(id).expect("Failed to resume"));
    let completed = wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await;
    assert!(completed.is_some(), "Session should finish after resume");

    engine.shutdown();
}

#[tokio::test]
async fn test_stop_and_requeue() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 100, 10);
    let mut events = engine.subscribe();

    let data = make_torrent("stopped.bin", 10000);
    let id = engine
        .add_torrent(
            &data,
            AddTorrentOptions {
                start: true,
                ..AddTorrentOptions::default()
            },
        )
        .expect("Failed to add torrent");
    engine.tick().await;

    wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Progress { id: eid, .. } if *eid == id),
        Duration::from_secs(10),
    )
    .await
    .expect("Should make progress");

    assert!(engine.stop(id).expect("Failed to stop"));
    assert_eq!(engine.status(id).unwrap().state, SessionState::Stopped);
    // Stopping twice is a legal no-op
    assert!(!engine.stop(id).unwrap());

    // No artifacts for an interrupted transfer
    tokio::time::sleep(Duration::from_millis(50)).await;
    let folder = temp_dir.path().join(format!("stopped.bin-{}", id));
    assert!(!folder.exists());

    // A stopped session can go through the queue again
    assert!(engine.enqueue_start(id).expect("Failed to re-enqueue"));
    engine.tick().await;
    let completed = wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await;
    assert!(completed.is_some(), "Re-queued session should complete");
    assert!(folder.join("stopped.bin").exists());

    engine.shutdown();
}

#[tokio::test]
async fn test_pause_near_completion_wins() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 2, 50);
    let mut events = engine.subscribe();

    let data = make_torrent("racy.bin", 1000);
    let id = engine
        .add_torrent(
            &data,
            AddTorrentOptions {
                start: true,
                ..AddTorrentOptions::default()
            },
        )
        .expect("Failed to add torrent");
    engine.tick().await;

    wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Started { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await
    .expect("Should start");

    if engine.pause(id).unwrap() {
        // The transfer must not flip a paused session to Completed
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.status(id).unwrap().state, SessionState::Paused);
    }

    engine.shutdown();
}

// =============================================================================
// Removal Tests
// =============================================================================

#[tokio::test]
async fn test_remove_deletes_artifacts() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);
    let mut events = engine.subscribe();

    let data = make_torrent("gone.bin", 800);
    let id = engine
        .add_torrent(
            &data,
            AddTorrentOptions {
                start: true,
                ..AddTorrentOptions::default()
            },
        )
        .expect("Failed to add torrent");
    engine.tick().await;

    wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await
    .expect("Should complete");

    let folder = temp_dir.path().join(format!("gone.bin-{}", id));
    assert!(folder.exists());

    engine.remove(id).await.expect("Failed to remove");
    assert!(engine.status(id).is_none());
    assert!(!folder.exists(), "Artifact folder should be deleted");

    // Removing again reports the missing session
    assert!(matches!(
        engine.remove(id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_queued_session_shifts_positions() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 100, 10);

    let mut ids = Vec::new();
    for i in 0..4 {
        let data = make_torrent(&format!("q{}.bin", i), 500);
        let id = engine
            .add_torrent(&data, AddTorrentOptions::default())
            .expect("Failed to add torrent");
        engine.enqueue_start(id).expect("Failed to enqueue");
        ids.push(id);
    }
    engine.tick().await;
    assert_eq!(engine.status(ids[2]).unwrap().queue_position, Some(1));
    assert_eq!(engine.status(ids[3]).unwrap().queue_position, Some(2));

    engine.remove(ids[2]).await.expect("Failed to remove");
    assert_eq!(engine.status(ids[3]).unwrap().queue_position, Some(1));

    engine.shutdown();
}

// =============================================================================
// Artifact Collision Tests
// =============================================================================

#[tokio::test]
async fn test_collision_gets_numbered_name() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 4, 1);
    let mut events = engine.subscribe();

    let data = make_torrent("dup.txt", 300);
    let id = engine
        .add_torrent(&data, AddTorrentOptions::default())
        .expect("Failed to add torrent");

    // Pre-existing file with the artifact's name
    let folder = temp_dir.path().join(format!("dup.txt-{}", id));
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("dup.txt"), b"old contents").unwrap();

    engine.enqueue_start(id).expect("Failed to enqueue");
    engine.tick().await;
    wait_for_event(
        &mut events,
        |e| matches!(e, SessionEvent::Completed { id: eid } if *eid == id),
        Duration::from_secs(10),
    )
    .await
    .expect("Should complete");

    // The original survives; the new artifact gets a counter
    assert_eq!(std::fs::read(folder.join("dup.txt")).unwrap(), b"old contents");
    assert_eq!(
        std::fs::metadata(folder.join("dup (1).txt")).unwrap().len(),
        300
    );
}

// =============================================================================
// Watch Directory Tests
// =============================================================================

#[tokio::test]
async fn test_watch_directory_ingestion() {
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let watch_dir = TempDir::new().expect("Failed to create watch dir");

    let config = EngineConfig::new()
        .download_dir(temp_dir.path())
        .max_active_downloads(2)
        .transfer_steps(4)
        .step_interval_ms(1)
        .tick_interval_ms(3_600_000)
        .watch_dir(watch_dir.path());
    let engine = SessionEngine::new(config).expect("Failed to create engine");

    let data = make_torrent("watched.bin", 600);
    std::fs::write(watch_dir.path().join("watched.torrent"), &data).unwrap();
    std::fs::write(watch_dir.path().join("ignore.txt"), b"x").unwrap();

    engine.tick().await;

    let sessions = engine.list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "watched.bin");
    // start_added defaults to true, so the session joined the queue
    assert_ne!(sessions[0].state, SessionState::Idle);

    // Processed marker keeps the next scan from re-ingesting
    assert!(!watch_dir.path().join("watched.torrent").exists());
    assert!(watch_dir.path().join("watched.torrent.added").exists());
    assert!(watch_dir.path().join("ignore.txt").exists());

    engine.tick().await;
    assert_eq!(engine.list().len(), 1);

    engine.shutdown();
}

#[tokio::test]
async fn test_watch_leaves_bad_files_in_place() {
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let watch_dir = TempDir::new().expect("Failed to create watch dir");

    let config = EngineConfig::new()
        .download_dir(temp_dir.path())
        .transfer_steps(4)
        .step_interval_ms(1)
        .tick_interval_ms(3_600_000)
        .watch_dir(watch_dir.path());
    let engine = SessionEngine::new(config).expect("Failed to create engine");

    std::fs::write(watch_dir.path().join("bad.torrent"), b"junk").unwrap();
    let data = make_torrent("good.bin", 100);
    std::fs::write(watch_dir.path().join("good.torrent"), &data).unwrap();

    engine.tick().await;

    // The good file is ingested; the bad one stays for inspection
    assert_eq!(engine.list().len(), 1);
    assert!(watch_dir.path().join("bad.torrent").exists());
    assert!(watch_dir.path().join("good.torrent.added").exists());

    engine.shutdown();
}

// =============================================================================
// Stats Tests
// =============================================================================

#[tokio::test]
async fn test_stats_reflect_session_counts() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = create_test_engine(&temp_dir, 100, 10);

    for i in 0..3 {
        let data = make_torrent(&format!("s{}.bin", i), 500);
        let id = engine
            .add_torrent(&data, AddTorrentOptions::default())
            .expect("Failed to add torrent");
        engine.enqueue_start(id).expect("Failed to enqueue");
    }
    engine.tick().await;

    let stats = engine.stats();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.active_count, 2);
    assert_eq!(stats.queued_count, 1);

    engine.shutdown();
}
