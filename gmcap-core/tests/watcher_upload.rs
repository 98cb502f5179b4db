use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use gmcap_core::{
    AutoUploadWatcher, ChildFilter, FileId, FolderId, FsRemoteStore, RemoteEntry, RemoteStore,
    SessionArchive, StoreError, StoreResult,
};

fn stage_clip(staging: &Path, session: &str, name: &str, content: &str) {
    let clips = staging.join(session).join("Clips");
    std::fs::create_dir_all(&clips).unwrap();
    std::fs::write(clips.join(name), content).unwrap();
}

fn watcher(staging: &Path, archive: Arc<SessionArchive>) -> AutoUploadWatcher {
    AutoUploadWatcher::new(
        staging,
        archive,
        Duration::from_millis(10),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn finalized_clips_are_uploaded_on_scan() {
    let remote = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    stage_clip(staging.path(), "Data1", "Clip001.webm", "first");
    stage_clip(staging.path(), "Data1", "Clip002.webm", "second");
    // In-progress writes must be invisible to the scan.
    stage_clip(staging.path(), "Data1", "Clip003.webm.part", "partial");

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let watcher = watcher(staging.path(), archive);

    watcher.scan_once().await;

    let uploaded = remote.path().join("Data1").join("Clips");
    assert_eq!(
        std::fs::read_to_string(uploaded.join("Clip001.webm")).unwrap(),
        "first"
    );
    assert_eq!(
        std::fs::read_to_string(uploaded.join("Clip002.webm")).unwrap(),
        "second"
    );
    assert!(!uploaded.join("Clip003.webm.part").exists());
    assert_eq!(watcher.error_count(), 0);
}

#[tokio::test]
async fn rescans_do_not_reupload() {
    let remote = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    stage_clip(staging.path(), "Data1", "Clip001.webm", "payload");

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let watcher = watcher(staging.path(), archive.clone());

    watcher.scan_once().await;
    let after_first = archive.space().used_gb;
    watcher.scan_once().await;

    assert_eq!(archive.space().used_gb, after_first);
    assert_eq!(watcher.error_count(), 0);
}

#[tokio::test]
async fn removed_clips_are_forgotten_and_rescanned_on_return() {
    let remote = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    stage_clip(staging.path(), "Data1", "Clip001.webm", "original");

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let watcher = watcher(staging.path(), archive);

    watcher.scan_once().await;
    let uploaded = remote.path().join("Data1").join("Clips").join("Clip001.webm");
    assert_eq!(std::fs::read_to_string(&uploaded).unwrap(), "original");

    // The clip vanishes on both sides, then reappears under the same name.
    std::fs::remove_file(staging.path().join("Data1/Clips/Clip001.webm")).unwrap();
    std::fs::remove_file(&uploaded).unwrap();
    watcher.scan_once().await;
    stage_clip(staging.path(), "Data1", "Clip001.webm", "replacement");

    watcher.scan_once().await;
    assert_eq!(std::fs::read_to_string(&uploaded).unwrap(), "replacement");
    assert_eq!(watcher.error_count(), 0);
}

struct RefusingStore;

#[async_trait]
impl RemoteStore for RefusingStore {
    async fn root(&self) -> StoreResult<FolderId> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn create_folder(&self, _path: &str) -> StoreResult<FolderId> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn find_folder(&self, _path: &str) -> StoreResult<Option<FolderId>> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn list_children(
        &self,
        _folder: &FolderId,
        _filter: ChildFilter,
    ) -> StoreResult<Vec<RemoteEntry>> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn upload_if_absent(
        &self,
        _folder: &FolderId,
        _local: &Path,
        _remote_name: Option<&str>,
    ) -> StoreResult<FileId> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn read_text_blob(&self, _folder: &FolderId, _name: &str) -> StoreResult<String> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn write_text_blob(
        &self,
        _folder: &FolderId,
        _name: &str,
        _content: &str,
    ) -> StoreResult<()> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }

    async fn download_file(&self, _id: &FileId, _local: &Path) -> StoreResult<()> {
        Err(StoreError::Unavailable("remote offline".to_string()))
    }
}

#[tokio::test]
async fn failed_uploads_are_counted_and_retried_next_scan() {
    let staging = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    stage_clip(staging.path(), "Data1", "Clip001.webm", "a");
    stage_clip(staging.path(), "Data2", "Clip001.webm", "b");

    let archive = Arc::new(SessionArchive::new(
        Arc::new(RefusingStore),
        15.0,
        cache.path(),
        "Data",
    ));
    let watcher = watcher(staging.path(), archive);

    watcher.scan_once().await;
    assert_eq!(watcher.error_count(), 2);

    // Nothing was marked done; the next scan tries the same clips again.
    watcher.scan_once().await;
    assert_eq!(watcher.error_count(), 4);
}
