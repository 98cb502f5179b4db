//! Filesystem-backed [`RemoteStore`] for local deployments and tests.
//!
//! Identities are opaque UUIDs mapped to paths relative to the base
//! directory, mirroring how cloud stores hand out ids distinct from names.
//! The map lives in-process; ids are not stable across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{ChildFilter, FileId, FolderId, RemoteEntry, RemoteStore, StoreError, StoreResult};

#[derive(Debug)]
pub struct FsRemoteStore {
    base: PathBuf,
    ids: Mutex<IdMap>,
}

#[derive(Debug, Default)]
struct IdMap {
    by_id: HashMap<String, PathBuf>,
    by_path: HashMap<PathBuf, String>,
}

impl IdMap {
    fn id_for(&mut self, rel: &Path) -> String {
        if let Some(id) = self.by_path.get(rel) {
            return id.clone();
        }
        let id = Uuid::new_v4().to_string();
        self.by_id.insert(id.clone(), rel.to_path_buf());
        self.by_path.insert(rel.to_path_buf(), id.clone());
        id
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        self.by_id.get(id).cloned()
    }
}

impl FsRemoteStore {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base: base.into(),
            ids: Mutex::new(IdMap::default()),
        }
    }

    fn id_for(&self, rel: &Path) -> String {
        self.ids.lock().unwrap().id_for(rel)
    }

    fn resolve_folder(&self, folder: &FolderId) -> StoreResult<(PathBuf, PathBuf)> {
        let rel = self
            .ids
            .lock()
            .unwrap()
            .path_for(&folder.0)
            .ok_or_else(|| StoreError::FolderNotFound(folder.0.clone()))?;
        let abs = self.base.join(&rel);
        Ok((rel, abs))
    }

    fn io_err(path: PathBuf) -> impl FnOnce(std::io::Error) -> StoreError {
        move |source| StoreError::Io { path, source }
    }
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    async fn root(&self) -> StoreResult<FolderId> {
        Ok(FolderId(self.id_for(Path::new(""))))
    }

    async fn create_folder(&self, path: &str) -> StoreResult<FolderId> {
        let abs = self.base.join(path);
        fs::create_dir_all(&abs)
            .await
            .map_err(Self::io_err(abs.clone()))?;
        Ok(FolderId(self.id_for(Path::new(path))))
    }

    async fn find_folder(&self, path: &str) -> StoreResult<Option<FolderId>> {
        let abs = self.base.join(path);
        match fs::metadata(&abs).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FolderId(self.id_for(Path::new(path))))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path: abs, source }),
        }
    }

    async fn list_children(
        &self,
        folder: &FolderId,
        filter: ChildFilter,
    ) -> StoreResult<Vec<RemoteEntry>> {
        let (rel, abs) = self.resolve_folder(folder)?;
        let mut dir = fs::read_dir(&abs)
            .await
            .map_err(Self::io_err(abs.clone()))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(Self::io_err(abs.clone()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(Self::io_err(entry.path()))?;
            let is_folder = file_type.is_dir();
            let keep = match filter {
                ChildFilter::Any => true,
                ChildFilter::FoldersOnly => is_folder,
                ChildFilter::FilesOnly => !is_folder,
            };
            if !keep {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let id = self.id_for(&rel.join(&name));
            entries.push(RemoteEntry {
                name,
                id,
                is_folder,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn upload_if_absent(
        &self,
        folder: &FolderId,
        local: &Path,
        remote_name: Option<&str>,
    ) -> StoreResult<FileId> {
        let (rel, abs) = self.resolve_folder(folder)?;
        let name = match remote_name {
            Some(name) => name.to_string(),
            None => local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| StoreError::Upload {
                    name: local.display().to_string(),
                    detail: "local path has no file name".to_string(),
                })?,
        };
        let dest = abs.join(&name);
        let dest_rel = rel.join(&name);
        if fs::metadata(&dest).await.is_ok() {
            return Ok(FileId(self.id_for(&dest_rel)));
        }
        fs::copy(local, &dest)
            .await
            .map_err(|source| StoreError::Upload {
                name: name.clone(),
                detail: source.to_string(),
            })?;
        Ok(FileId(self.id_for(&dest_rel)))
    }

    async fn read_text_blob(&self, folder: &FolderId, name: &str) -> StoreResult<String> {
        let (_, abs) = self.resolve_folder(folder)?;
        let path = abs.join(name);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn write_text_blob(
        &self,
        folder: &FolderId,
        name: &str,
        content: &str,
    ) -> StoreResult<()> {
        let (_, abs) = self.resolve_folder(folder)?;
        let path = abs.join(name);
        fs::write(&path, content)
            .await
            .map_err(Self::io_err(path.clone()))
    }

    async fn download_file(&self, id: &FileId, local: &Path) -> StoreResult<()> {
        let rel = self
            .ids
            .lock()
            .unwrap()
            .path_for(&id.0)
            .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        let source_path = self.base.join(rel);
        fs::copy(&source_path, local)
            .await
            .map(|_| ())
            .map_err(Self::io_err(local.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upload_if_absent_returns_existing_identity() {
        let remote = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = FsRemoteStore::new(remote.path());

        let local = scratch.path().join("Clip001.webm");
        tokio::fs::write(&local, b"first").await.unwrap();

        let folder = store.create_folder("Data1/Clips").await.unwrap();
        let first = store.upload_if_absent(&folder, &local, None).await.unwrap();

        tokio::fs::write(&local, b"second").await.unwrap();
        let second = store.upload_if_absent(&folder, &local, None).await.unwrap();

        assert_eq!(first, second);
        let stored = tokio::fs::read(remote.path().join("Data1/Clips/Clip001.webm"))
            .await
            .unwrap();
        assert_eq!(stored, b"first");
    }

    #[tokio::test]
    async fn create_folder_is_idempotent() {
        let remote = TempDir::new().unwrap();
        let store = FsRemoteStore::new(remote.path());
        let a = store.create_folder("Data2").await.unwrap();
        let b = store.create_folder("Data2").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn list_children_applies_filter() {
        let remote = TempDir::new().unwrap();
        let store = FsRemoteStore::new(remote.path());
        store.create_folder("Data1").await.unwrap();
        let root = store.root().await.unwrap();
        store
            .write_text_blob(&root, "stray.txt", "x")
            .await
            .unwrap();

        let folders = store
            .list_children(&root, ChildFilter::FoldersOnly)
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_folder);
        assert_eq!(folders[0].name, "Data1");

        let files = store
            .list_children(&root, ChildFilter::FilesOnly)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "stray.txt");
    }

    #[tokio::test]
    async fn missing_blob_maps_to_not_found() {
        let remote = TempDir::new().unwrap();
        let store = FsRemoteStore::new(remote.path());
        let folder = store.create_folder("Data3").await.unwrap();
        let err = store
            .read_text_blob(&folder, "patient.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
