//! End-to-end tests with the drop directory transport
//!
//! These tests verify:
//! - A batch lands in `<drop>/<asset_type>/<name>` with the relative path as version id
//! - A missing source file fails only that file
//! - A later session reconciles against the drop directory and skips finished files
//! - A cancelled copy leaves nothing for a later session to mistake as finished

mod common;

use camino::Utf8PathBuf;
use common::{TEST_TIMEOUT, eventually, wait_for};
use dam_upload::models::{FileStatus, RawFile, UploaderConfig};
use dam_upload::services::{AssetClassifier, DirectoryUploader, DropDirReconciler};
use dam_upload::{DriverHandle, IngestController, QueueDriver, TransferStore};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::timeout;

struct Session {
    store: TransferStore,
    controller: IngestController,
    driver: DriverHandle,
}

fn session(drop_dir: &Utf8PathBuf) -> Session {
    session_with_chunk_size(drop_dir, 16)
}

fn session_with_chunk_size(drop_dir: &Utf8PathBuf, chunk_size: usize) -> Session {
    let store = TransferStore::new();
    let uploader =
        Arc::new(DirectoryUploader::new(drop_dir.clone()).with_chunk_size(chunk_size));
    let driver = QueueDriver::new(store.clone(), uploader).spawn();
    let classifier = AssetClassifier::new(&UploaderConfig::default()).unwrap();
    let controller = IngestController::new(store.clone(), classifier);
    Session {
        store,
        controller,
        driver,
    }
}

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

fn write_source(dir: &Utf8PathBuf, name: &str, len: usize) -> RawFile {
    let path = dir.join(name);
    fs::write(&path, vec![7u8; len]).unwrap();
    RawFile::from_path(&path).unwrap()
}

#[tokio::test]
async fn test_batch_copies_into_drop_dir() {
    let temp = TempDir::new().unwrap();
    let sources = utf8(temp.path().join("sources"));
    let drop_dir = utf8(temp.path().join("drop"));
    fs::create_dir_all(&sources).unwrap();

    let s = session(&drop_dir);
    let report = s.controller.load_files(vec![
        write_source(&sources, "photo.jpg", 100),
        write_source(&sources, "clip.mov", 40),
        write_source(&sources, "empty.txt", 0),
    ]);
    assert_eq!(report.accepted.len(), 3);

    s.controller.submit().unwrap();
    let summary = timeout(TEST_TIMEOUT, s.controller.wait_for_batch()).await.unwrap();
    assert_eq!(summary.uploaded, 3);

    assert_eq!(fs::read(drop_dir.join("image/photo.jpg")).unwrap().len(), 100);
    assert_eq!(fs::read(drop_dir.join("video/clip.mov")).unwrap().len(), 40);
    assert!(drop_dir.join("document/empty.txt").exists());

    let state = s.store.snapshot();
    let photo = state.find_by_name("photo.jpg").unwrap();
    assert_eq!(photo.version_ids, vec!["image/photo.jpg".to_string()]);
    assert_eq!(photo.progress, 100);

    s.driver.stop().await;
}

#[tokio::test]
async fn test_missing_source_fails_only_that_file() {
    let temp = TempDir::new().unwrap();
    let sources = utf8(temp.path().join("sources"));
    let drop_dir = utf8(temp.path().join("drop"));
    fs::create_dir_all(&sources).unwrap();

    let s = session(&drop_dir);
    let gone = write_source(&sources, "gone.jpg", 10);
    fs::remove_file(&gone.path).unwrap();
    s.controller
        .load_files(vec![gone, write_source(&sources, "kept.jpg", 10)]);

    s.controller.submit().unwrap();
    let summary = timeout(TEST_TIMEOUT, s.controller.wait_for_batch()).await.unwrap();
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.failed, 1);

    let state = s.store.snapshot();
    let failed = state.find_by_name("gone.jpg").unwrap();
    assert_eq!(failed.status, FileStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("not found"));
    assert!(!drop_dir.join("image/gone.jpg").exists());

    s.driver.stop().await;
}

#[tokio::test]
async fn test_second_session_reconciles_finished_files() {
    let temp = TempDir::new().unwrap();
    let sources = utf8(temp.path().join("sources"));
    let drop_dir = utf8(temp.path().join("drop"));
    fs::create_dir_all(&sources).unwrap();

    let first = session(&drop_dir);
    first
        .controller
        .load_files(vec![write_source(&sources, "a.jpg", 10)]);
    first.controller.submit().unwrap();
    timeout(TEST_TIMEOUT, first.controller.wait_for_batch()).await.unwrap();
    first.driver.stop().await;

    let second = session(&drop_dir);
    second
        .controller
        .reconcile(Arc::new(DropDirReconciler::new(drop_dir.clone())))
        .await
        .unwrap();

    let reconciled = second.store.read(|s| s.find_by_name("a.jpg").cloned()).unwrap();
    assert_eq!(reconciled.status, FileStatus::Complete);
    assert_eq!(reconciled.version_ids, vec!["image/a.jpg".to_string()]);

    let report = second.controller.load_files(vec![
        RawFile::from_path(&sources.join("a.jpg")).unwrap(),
        write_source(&sources, "b.jpg", 10),
    ]);
    assert_eq!(report.duplicates, vec!["a.jpg".to_string()]);
    assert_eq!(report.accepted.len(), 1);

    assert_eq!(second.controller.submit(), Ok(1));
    let summary = timeout(TEST_TIMEOUT, second.controller.wait_for_batch()).await.unwrap();
    assert_eq!(summary.uploaded, 2);

    second.driver.stop().await;
}

#[tokio::test]
async fn test_cancelled_copy_is_not_reconciled_as_uploaded() {
    let temp = TempDir::new().unwrap();
    let sources = utf8(temp.path().join("sources"));
    let drop_dir = utf8(temp.path().join("drop"));
    fs::create_dir_all(&sources).unwrap();

    let first = session_with_chunk_size(&drop_dir, 64);
    let id = first
        .controller
        .load_files(vec![write_source(&sources, "big.jpg", 2 * 1024 * 1024)])
        .accepted[0];
    first.controller.submit().unwrap();

    // Cancel once the copy is under way
    wait_for(&first.store, |s| s.file(&id).is_some_and(|f| f.progress >= 5)).await;
    first.controller.cancel_upload(id).unwrap();
    let summary = timeout(TEST_TIMEOUT, first.controller.wait_for_batch()).await.unwrap();
    assert_eq!(summary.cancelled, 1);
    first.driver.stop().await;

    let image_dir = drop_dir.join("image");
    let (done, partial) = (image_dir.join("big.jpg"), image_dir.join("big.jpg.part"));
    eventually(move || !done.exists() && !partial.exists()).await;

    let second = session(&drop_dir);
    second
        .controller
        .reconcile(Arc::new(DropDirReconciler::new(drop_dir.clone())))
        .await
        .unwrap();
    assert!(second.store.read(|s| s.find_by_name("big.jpg").is_none()));

    let report = second
        .controller
        .load_files(vec![RawFile::from_path(&sources.join("big.jpg")).unwrap()]);
    assert_eq!(report.accepted.len(), 1);
    assert!(report.duplicates.is_empty());

    second.driver.stop().await;
}
