//! High-level client for the remote session archive.
//!
//! Wraps the [`RemoteStore`] capability with the session-shaped operations
//! the pipeline needs: clip upload with skip-if-exists, metadata blobs,
//! listing, clip download into the local cache, and verification updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::session::{
    PatientInfo, RemoteSession, VerificationStatus, CLIPS_DIR_NAME, COMMENT_KEY,
    PATIENT_INFO_NAME, STATUS_KEY, TIMESTAMP_KEY,
};
use crate::store::{
    ChildFilter, DriveSpace, FileId, FolderId, RemoteStore, SpaceTracker, StoreError,
};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("patient info missing for {0}")]
    InfoMissing(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

pub struct SessionArchive {
    store: Arc<dyn RemoteStore>,
    space: SpaceTracker,
    clips_cache_dir: PathBuf,
    prefix: String,
}

impl SessionArchive {
    pub fn new<P: Into<PathBuf>>(
        store: Arc<dyn RemoteStore>,
        total_gb: f64,
        clips_cache_dir: P,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            space: SpaceTracker::new(total_gb),
            clips_cache_dir: clips_cache_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    pub fn space(&self) -> DriveSpace {
        self.space.snapshot()
    }

    /// Upload one clip into `<session>/Clips`.
    ///
    /// If an object of the same name already exists in the target folder,
    /// its identity is returned and nothing is transferred; the space
    /// estimate only grows on actual transfers.
    pub async fn upload_clip(&self, session: &str, local: &Path) -> ArchiveResult<FileId> {
        let folder = self
            .store
            .create_folder(&format!("{session}/{CLIPS_DIR_NAME}"))
            .await?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::Upload {
                name: local.display().to_string(),
                detail: "local path has no file name".to_string(),
            })?;
        let existing = self
            .store
            .list_children(&folder, ChildFilter::FilesOnly)
            .await?;
        if let Some(entry) = existing.iter().find(|entry| entry.name == name) {
            info!(session, clip = %name, "clip already present remotely, skipping upload");
            return Ok(FileId(entry.id.clone()));
        }
        let id = self.store.upload_if_absent(&folder, local, None).await?;
        let size = fs::metadata(local)
            .await
            .map_err(|source| ArchiveError::Io {
                path: local.to_path_buf(),
                source,
            })?
            .len();
        self.space.record_upload(size);
        info!(session, clip = %name, bytes = size, "uploaded clip");
        Ok(id)
    }

    /// Write (or overwrite) the session's metadata blob.
    pub async fn upload_patient_info(
        &self,
        session: &str,
        info: &PatientInfo,
    ) -> ArchiveResult<()> {
        let folder = self.store.create_folder(session).await?;
        self.store
            .write_text_blob(&folder, PATIENT_INFO_NAME, &info.render())
            .await?;
        info!(session, "uploaded patient info");
        Ok(())
    }

    /// All remote sessions carrying a metadata blob. Sessions whose blob
    /// has not arrived yet (clips-only partial state) are skipped, not
    /// errors.
    pub async fn list_sessions(&self) -> ArchiveResult<Vec<RemoteSession>> {
        let root = self.store.root().await?;
        let folders = self
            .store
            .list_children(&root, ChildFilter::FoldersOnly)
            .await?;
        let mut sessions = Vec::new();
        for entry in folders {
            if !entry.name.starts_with(&self.prefix) {
                continue;
            }
            let folder = FolderId(entry.id.clone());
            match self.store.read_text_blob(&folder, PATIENT_INFO_NAME).await {
                Ok(content) => {
                    let info = PatientInfo::parse(&content);
                    sessions.push(RemoteSession {
                        folder_name: entry.name,
                        status: info.status(),
                        comment: info.comment().to_string(),
                        info,
                    });
                }
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(sessions)
    }

    pub async fn session_details(&self, session: &str) -> ArchiveResult<PatientInfo> {
        let folder = self
            .store
            .find_folder(session)
            .await?
            .ok_or_else(|| ArchiveError::SessionNotFound(session.to_string()))?;
        match self.store.read_text_blob(&folder, PATIENT_INFO_NAME).await {
            Ok(content) => Ok(PatientInfo::parse(&content)),
            Err(StoreError::NotFound(_)) => Err(ArchiveError::InfoMissing(session.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Populate `clips_cache/<session>` with the session's remote clips,
    /// skipping files already present locally. Returns the cache directory.
    pub async fn download_clips(&self, session: &str) -> ArchiveResult<PathBuf> {
        let clips_path = format!("{session}/{CLIPS_DIR_NAME}");
        let folder = self
            .store
            .find_folder(&clips_path)
            .await?
            .ok_or_else(|| ArchiveError::SessionNotFound(clips_path.clone()))?;
        let local_dir = self.clips_cache_dir.join(session);
        fs::create_dir_all(&local_dir)
            .await
            .map_err(|source| ArchiveError::Io {
                path: local_dir.clone(),
                source,
            })?;
        for entry in self
            .store
            .list_children(&folder, ChildFilter::FilesOnly)
            .await?
        {
            let local = local_dir.join(&entry.name);
            if fs::metadata(&local).await.is_ok() {
                continue;
            }
            info!(session, clip = %entry.name, "downloading clip");
            self.store
                .download_file(&FileId(entry.id), &local)
                .await?;
        }
        Ok(local_dir)
    }

    /// Rewrite the review keys of the session's metadata blob in place,
    /// preserving every other line.
    pub async fn update_verification(
        &self,
        session: &str,
        status: VerificationStatus,
        reason: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> ArchiveResult<()> {
        let folder = self
            .store
            .find_folder(session)
            .await?
            .ok_or_else(|| ArchiveError::SessionNotFound(session.to_string()))?;
        let content = match self.store.read_text_blob(&folder, PATIENT_INFO_NAME).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => {
                return Err(ArchiveError::InfoMissing(session.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let mut info = PatientInfo::parse(&content);
        info.set(STATUS_KEY, status.as_str());
        info.set(COMMENT_KEY, reason);
        info.set(
            TIMESTAMP_KEY,
            &timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
        );
        self.store
            .write_text_blob(&folder, PATIENT_INFO_NAME, &info.render())
            .await?;
        info!(session, status = %status, "updated verification status");
        Ok(())
    }
}
