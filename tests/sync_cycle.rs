//! End-to-end sync passes against an in-memory remote and a temp cache dir.

use async_trait::async_trait;
use frame_kiosk::error::SyncError;
use frame_kiosk::manifest::{self, PARTIAL_DIR};
use frame_kiosk::provider::{RemoteEntry, RemoteProvider};
use frame_kiosk::supervisor::Supervisor;
use frame_kiosk::sync::SyncEngine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// In-memory remote folder. `short_by` truncates a file's transfer without
/// touching its listed size; `offline` fails the listing outright.
#[derive(Default)]
struct StubRemote {
    files: Mutex<HashMap<String, Vec<u8>>>,
    short_by: Mutex<HashMap<String, usize>>,
    offline: Mutex<bool>,
}

impl StubRemote {
    fn put(&self, name: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), contents.to_vec());
    }

    fn remove(&self, name: &str) {
        self.files.lock().unwrap().remove(name);
    }

    fn truncate_transfers(&self, name: &str, missing_bytes: usize) {
        self.short_by
            .lock()
            .unwrap()
            .insert(name.to_string(), missing_bytes);
    }

    fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

#[async_trait]
impl RemoteProvider for StubRemote {
    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError> {
        if *self.offline.lock().unwrap() {
            return Err(SyncError::ProviderUnavailable("remote offline".into()));
        }
        let files = self.files.lock().unwrap();
        let mut entries: Vec<RemoteEntry> = files
            .iter()
            .map(|(name, contents)| RemoteEntry {
                name: name.clone(),
                size: contents.len() as u64,
                modified: SystemTime::UNIX_EPOCH,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64, SyncError> {
        let contents = self
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::fetch(name, "no such file"))?;
        let keep = contents.len()
            - self
                .short_by
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .unwrap_or(0);
        tokio::fs::write(dest, &contents[..keep])
            .await
            .map_err(|e| SyncError::fetch(name, e))?;
        Ok(keep as u64)
    }
}

fn engine_for(remote: Arc<StubRemote>, cache_dir: PathBuf) -> SyncEngine {
    SyncEngine::new(
        remote,
        cache_dir,
        vec![".jpg".into(), ".mp4".into()],
        Arc::new(Supervisor::new()),
        false,
        Duration::from_secs(1),
    )
}

fn formats() -> Vec<String> {
    vec![".jpg".into(), ".mp4".into()]
}

#[tokio::test]
async fn first_pass_fetches_second_pass_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("a.jpg", b"aaaa");
    remote.put("b.mp4", b"bbbbbbbb");
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());

    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 2);
    assert!(result.failed.is_empty());
    assert_eq!(std::fs::read(dir.path().join("a.jpg")).unwrap(), b"aaaa");

    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 0);
    assert_eq!(result.deleted, 0);
    assert_eq!(result.skipped, 2);
}

#[tokio::test]
async fn size_change_refetches_only_the_changed_file() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("a.jpg", b"v1");
    remote.put("b.jpg", b"same");
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());
    engine.synchronize().await.unwrap();

    remote.put("a.jpg", b"version-two");
    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(std::fs::read(dir.path().join("a.jpg")).unwrap(), b"version-two");
}

#[tokio::test]
async fn files_gone_from_remote_are_garbage_collected() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("keep.jpg", b"k");
    remote.put("drop.jpg", b"d");
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());
    engine.synchronize().await.unwrap();

    remote.remove("drop.jpg");
    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.deleted, 1);
    assert!(dir.path().join("keep.jpg").exists());
    assert!(!dir.path().join("drop.jpg").exists());
}

#[tokio::test]
async fn short_transfer_never_becomes_visible() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("photo.jpg", b"full-contents");
    remote.truncate_transfers("photo.jpg", 5);
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());

    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 0);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].0, "photo.jpg");
    assert!(!dir.path().join("photo.jpg").exists());
    // The failed partial was cleaned up too.
    assert!(!dir.path().join(PARTIAL_DIR).join("photo.jpg.part").exists());

    // The manifest never observed the broken file.
    assert!(manifest::scan(dir.path(), &formats()).is_empty());
}

#[tokio::test]
async fn one_failed_fetch_does_not_abort_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("good.jpg", b"good");
    remote.put("bad.jpg", b"bad-contents");
    remote.truncate_transfers("bad.jpg", 3);
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());

    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 1);
    assert_eq!(result.failed.len(), 1);
    assert!(dir.path().join("good.jpg").exists());
    assert!(!dir.path().join("bad.jpg").exists());
}

#[tokio::test]
async fn offline_remote_leaves_local_media_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("a.jpg", b"a");
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());
    engine.synchronize().await.unwrap();

    remote.set_offline(true);
    let err = engine.synchronize().await.unwrap_err();
    assert!(matches!(err, SyncError::ProviderUnavailable(_)));
    // Cached media survives the outage; playback continues from it.
    assert!(dir.path().join("a.jpg").exists());
}

#[tokio::test]
async fn unsupported_and_unsafe_remote_names_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(StubRemote::default());
    remote.put("ok.jpg", b"ok");
    remote.put("notes.txt", b"text");
    remote.put(".hidden.jpg", b"dot");
    remote.put("../escape.jpg", b"bad");
    let engine = engine_for(Arc::clone(&remote), dir.path().to_path_buf());

    let result = engine.synchronize().await.unwrap();
    assert_eq!(result.fetched, 1);
    assert!(dir.path().join("ok.jpg").exists());
    assert!(!dir.path().join("notes.txt").exists());

    let names: Vec<_> = manifest::scan(dir.path(), &formats())
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["ok.jpg"]);
}
