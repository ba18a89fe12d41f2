//! Integration tests for the remote mirror adapter
//!
//! - Dial verification of the remote root
//! - Upload stamps the remote modification time
//! - Recursive, idempotent removal
//! - Rename and create_dir error surfacing

use devsync_core::domain::path::PathMapper;
use devsync_core::ports::remote::DialError;
use devsync_sync::mirror::RemoteMirror;

use crate::common::{self, remote, MemoryRemote, RemoteOp, REMOTE_ROOT};

#[tokio::test]
async fn test_dial_rejects_missing_remote_root() {
    let dir = tempfile::tempdir().unwrap();
    let server = MemoryRemote::with_root("/elsewhere");
    let mapper = PathMapper::new(dir.path(), REMOTE_ROOT).unwrap();

    let result =
        RemoteMirror::dial(server.connector(), common::params(REMOTE_ROOT), mapper).await;

    assert!(matches!(result, Err(DialError::BadRemoteDir(_))));
    assert!(!server.is_session_alive());
}

#[tokio::test]
async fn test_dial_rejects_remote_root_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = MemoryRemote::with_root("/");
    server.put_file(REMOTE_ROOT, b"not a dir");
    let mapper = PathMapper::new(dir.path(), REMOTE_ROOT).unwrap();

    let result =
        RemoteMirror::dial(server.connector(), common::params(REMOTE_ROOT), mapper).await;

    assert!(matches!(result, Err(DialError::BadRemoteDir(_))));
}

#[tokio::test]
async fn test_dial_reports_unreachable_host() {
    let dir = tempfile::tempdir().unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    server.fail_dials(1);
    let mapper = PathMapper::new(dir.path(), REMOTE_ROOT).unwrap();

    let result =
        RemoteMirror::dial(server.connector(), common::params(REMOTE_ROOT), mapper).await;

    assert!(matches!(result, Err(DialError::BadHost(_))));
}

#[tokio::test]
async fn test_upload_writes_content_and_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    std::fs::write(root.join("a.txt"), b"hello world").unwrap();
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    let bytes = mirror.upload_file(&root.join("a.txt")).await.unwrap();

    assert_eq!(bytes, 11);
    assert_eq!(server.file(&remote("a.txt")).unwrap(), b"hello world");
    assert!(server.modified(&remote("a.txt")).is_some());
    assert_eq!(
        server.ops(),
        vec![
            RemoteOp::Create(remote("a.txt")),
            RemoteOp::SetModified(remote("a.txt")),
        ]
    );
}

#[tokio::test]
async fn test_upload_of_vanished_file_is_local_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    let err = mirror.upload_file(&root.join("gone.txt")).await.unwrap_err();

    assert!(err.is_local_access());
    assert!(server.ops().is_empty());
}

#[tokio::test]
async fn test_remove_tree_and_remove_again() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    server.put_file(&remote("tree/a.txt"), b"a");
    server.put_file(&remote("tree/sub/b.txt"), b"b");
    server.put_dir(&remote("tree/sub/empty"));
    let mut mirror = common::dial_mirror(&server, &root).await;

    mirror.remove(&root.join("tree")).await.unwrap();

    assert!(!server.exists(&remote("tree")));
    assert!(!server.exists(&remote("tree/sub/b.txt")));
    assert!(server.is_dir(REMOTE_ROOT));

    server.clear_ops();
    mirror.remove(&root.join("tree")).await.unwrap();
    assert!(server.ops().is_empty());
}

#[tokio::test]
async fn test_remove_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    server.put_file(&remote("a.txt"), b"a");
    let mut mirror = common::dial_mirror(&server, &root).await;

    mirror.remove(&root.join("a.txt")).await.unwrap();

    assert_eq!(server.ops(), vec![RemoteOp::RemoveFile(remote("a.txt"))]);
}

#[tokio::test]
async fn test_create_dir_without_parent_fails() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    let err = mirror.create_dir(&root.join("x/y")).await.unwrap_err();

    assert!(!err.is_transport_severed());
    assert!(!server.exists(&remote("x/y")));
}

#[tokio::test]
async fn test_rename_moves_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    server.put_file(&remote("old/a.txt"), b"a");
    let mut mirror = common::dial_mirror(&server, &root).await;

    mirror
        .rename(&root.join("old"), &root.join("new"))
        .await
        .unwrap();

    assert!(!server.exists(&remote("old")));
    assert_eq!(server.file(&remote("new/a.txt")).unwrap(), b"a");
}

#[tokio::test]
async fn test_path_outside_root_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = common::local_root(&dir);
    let server = MemoryRemote::with_root(REMOTE_ROOT);
    let mut mirror = common::dial_mirror(&server, &root).await;

    let err = mirror
        .create_dir(std::path::Path::new("/definitely/not/inside"))
        .await
        .unwrap_err();

    assert!(matches!(err, devsync_sync::SyncError::DomainError(_)));
    assert!(server.ops().is_empty());
}
