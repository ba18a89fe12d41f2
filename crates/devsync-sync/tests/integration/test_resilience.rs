//! Integration tests for transparent reconnection
//!
//! Runs with a paused clock so back-off waits are observable exactly:
//! - N failing dials produce N + 1 attempts with growing waits
//! - The failed operation is not replayed after the session returns
//! - Shutdown interrupts an endless reconnect loop

use std::time::Duration;

use devsync_sync::reconcile::Reconciler;
use tokio_util::sync::CancellationToken;

use crate::common::{self, remote, MemoryRemote, RemoteOp, REMOTE_ROOT};

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_increasing_delays() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::write(root.join("a.txt"), b"payload").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;
    assert_eq!(server.dial_count(), 1);

    server.sever();
    server.fail_dials(3);
    let err = mirror.upload_file(&root.join("a.txt")).await.unwrap_err();

    assert!(err.is_transport_severed());
    assert!(mirror.is_connected());
    assert_eq!(mirror.reconnect_count(), 4);
    assert_eq!(mirror.dropped_count(), 1);

    let dials = server.dial_times();
    assert_eq!(dials.len(), 5);
    let gaps: Vec<Duration> = dials[1..].windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 3);
    assert!(gaps.windows(2).all(|w| w[0] < w[1]), "gaps: {gaps:?}");
    let policy = common::policy();
    for (n, gap) in gaps.iter().enumerate() {
        assert!(*gap >= policy.delay(n as u32 + 1), "gap {n}: {gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_operation_is_not_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::write(root.join("a.txt"), b"payload").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    server.sever();
    server.fail_dials(1);
    mirror.upload_file(&root.join("a.txt")).await.unwrap_err();

    assert!(server.file(&remote("a.txt")).is_none());
    assert!(server.ops().is_empty());

    // The next operation goes through on the restored session
    mirror.upload_file(&root.join("a.txt")).await.unwrap();
    assert_eq!(server.file(&remote("a.txt")).unwrap(), b"payload");
    assert_eq!(
        server.ops(),
        vec![
            RemoteOp::Create(remote("a.txt")),
            RemoteOp::SetModified(remote("a.txt")),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_converges_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::write(root.join("a.txt"), b"a").unwrap();
    std::fs::write(root.join("b.txt"), b"b").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    server.sever();
    let first = Reconciler::reconcile(&mut mirror, &root).await;

    // The root stat hit the dead session, so nothing below it was attempted
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.mutations(), 0);
    assert_eq!(mirror.reconnect_count(), 1);
    assert!(mirror.is_connected());

    // The next pass runs on the restored session and converges
    let second = Reconciler::reconcile(&mut mirror, &root).await;
    assert!(second.is_clean(), "errors: {:?}", second.errors);
    assert_eq!(second.files_uploaded, 2);
    assert_eq!(server.file(&remote("a.txt")).unwrap(), b"a");
    assert_eq!(server.file(&remote("b.txt")).unwrap(), b"b");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_reconnect_loop() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::write(root.join("a.txt"), b"a").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let shutdown = CancellationToken::new();
    let mut mirror = common::dial_mirror(&server, &root)
        .await
        .with_shutdown(shutdown.clone());

    server.sever();
    server.fail_dials(usize::MAX);
    let canceller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            shutdown.cancel();
        })
    };

    let err = mirror.upload_file(&root.join("a.txt")).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_transport_severed());
    assert!(!mirror.is_connected());
    assert!(mirror.reconnect_count() >= 2);
}
