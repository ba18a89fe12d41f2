//! Integration tests for the session orchestrator
//!
//! - Invalid targets and unreachable remotes are rejected by `add`
//! - One-shot reconciliation through `sync_once`
//! - Live watching with the native watcher
//! - Sessions sharing an orchestrator fail and recover independently

use std::time::Duration;

use devsync_core::config::SessionSettings;
use devsync_core::ports::remote::DialError;
use devsync_sync::session::Orchestrator;
use devsync_sync::SyncError;

use crate::common::{self, remote, MemoryRemote, REMOTE_ROOT};

fn settings() -> SessionSettings {
    SessionSettings {
        debounce: Duration::from_millis(50),
        reconnect_base: Duration::from_millis(10),
        reconnect_step: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

#[tokio::test]
async fn test_add_rejects_invalid_target() {
    let dir = tempfile::tempdir().unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut orchestrator = Orchestrator::new(server.connector(), settings());

    let mut target = common::target(&dir.path().join("missing"));
    target.remote_port = 0;
    let err = orchestrator.add(target).await.unwrap_err();

    assert!(matches!(err, SyncError::DomainError(_)));
    assert!(orchestrator.sessions().is_empty());
    assert_eq!(server.dial_count(), 0);
}

#[tokio::test]
async fn test_add_rejects_missing_remote_dir() {
    let dir = tempfile::tempdir().unwrap();
    let server = MemoryRemote::with_root("/other");
    let mut orchestrator = Orchestrator::new(server.connector(), settings());

    let err = orchestrator
        .add(common::target(dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Dial(DialError::BadRemoteDir(_))));
}

#[tokio::test]
async fn test_sync_once_reconciles_and_stop_closes() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::create_dir(root.join("docs")).unwrap();
    std::fs::write(root.join("docs/readme.md"), b"# hi").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut orchestrator = Orchestrator::new(server.connector(), settings());

    orchestrator.add(common::target(&root)).await.unwrap();
    let report = orchestrator.sync_once().await.unwrap();
    orchestrator.stop().await;

    assert!(report.is_clean());
    assert_eq!(report.files_uploaded, 1);
    assert_eq!(server.file(&remote("docs/readme.md")).unwrap(), b"# hi");
    assert!(!server.is_session_alive());
    assert!(orchestrator.sessions()[0].is_stopped());
}

#[tokio::test]
async fn test_sync_once_without_sessions_fails() {
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut orchestrator = Orchestrator::new(server.connector(), settings());

    assert!(orchestrator.sync_once().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watching_mirrors_new_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut orchestrator = Orchestrator::new(server.connector(), settings());

    orchestrator.add(common::target(&root)).await.unwrap();
    orchestrator.start().unwrap();
    assert!(orchestrator.sessions()[0].is_running());

    // Give the native watch a moment to settle
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(root.join("watched.txt"), b"seen").unwrap();

    let mirrored = common::wait_for(Duration::from_secs(10), || {
        server.file(&remote("watched.txt")).as_deref() == Some(b"seen".as_slice())
    })
    .await;
    orchestrator.stop().await;

    assert!(mirrored, "file was not mirrored; ops: {:?}", server.ops());
    assert!(!server.is_session_alive());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_are_independent() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let root_a = common::local_root(&dir_a);
    let root_b = common::local_root(&dir_b);
    let server_a = MemoryRemote::with_root(REMOTE_ROOT);
    let server_b = MemoryRemote::with_root(REMOTE_ROOT);
    let connector = common::routed(&[("alpha", &server_a), ("beta", &server_b)]);
    let mut orchestrator = Orchestrator::new(connector, settings());

    orchestrator
        .add(common::target_on("alpha", &root_a))
        .await
        .unwrap();
    orchestrator
        .add(common::target_on("beta", &root_b))
        .await
        .unwrap();
    orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Only alpha loses its transport
    server_a.sever();
    std::fs::write(root_a.join("one.txt"), b"a1").unwrap();
    std::fs::write(root_b.join("one.txt"), b"b1").unwrap();

    let b_mirrored = common::wait_for(Duration::from_secs(10), || {
        server_b.file(&remote("one.txt")).as_deref() == Some(b"b1".as_slice())
    })
    .await;
    let a_redialed =
        common::wait_for(Duration::from_secs(10), || server_a.dial_count() >= 2).await;

    std::fs::write(root_a.join("two.txt"), b"a2").unwrap();
    let a_mirrored = common::wait_for(Duration::from_secs(10), || {
        server_a.file(&remote("two.txt")).as_deref() == Some(b"a2".as_slice())
    })
    .await;
    let sessions_running = orchestrator.sessions().iter().all(|s| s.is_running());
    orchestrator.stop().await;

    assert!(b_mirrored, "beta stalled; ops: {:?}", server_b.ops());
    assert!(a_redialed, "alpha did not reconnect");
    assert!(a_mirrored, "alpha stalled; ops: {:?}", server_a.ops());
    assert!(sessions_running);
    assert_eq!(server_b.dial_count(), 1);
    assert!(!server_a.is_session_alive());
    assert!(!server_b.is_session_alive());
}
