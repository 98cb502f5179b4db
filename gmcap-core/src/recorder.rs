//! Recording session manager: one long-lived chunk stream per session.
//!
//! Chunk files are written under a `.part` name and atomically renamed on
//! completion, so the auto-upload watcher only ever observes fully
//! flushed clips under their final names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::sequencer::FolderSequencer;
use crate::session::{
    ClipDescriptor, PatientInfo, RecordingSession, SessionRegistry, UploadState, CLIPS_DIR_NAME,
    PATIENT_INFO_NAME,
};

pub const CLIP_FILE_PREFIX: &str = "Clip";

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Acknowledgment sent back after each finalized chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ClipAck {
    pub session: String,
    pub seq: u32,
    pub file_name: String,
}

pub struct RecordingSessionManager {
    sequencer: FolderSequencer,
    registry: Arc<SessionRegistry>,
    staging_dir: PathBuf,
    prefix: String,
    clip_extension: String,
}

impl RecordingSessionManager {
    pub fn new<P: Into<PathBuf>>(
        sequencer: FolderSequencer,
        staging_dir: P,
        prefix: impl Into<String>,
        clip_extension: impl Into<String>,
    ) -> Self {
        Self {
            sequencer,
            registry: Arc::new(SessionRegistry::new()),
            staging_dir: staging_dir.into(),
            prefix: prefix.into(),
            clip_extension: clip_extension.into(),
        }
    }

    /// Handle to the live-session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Allocate a session name, create its staging subtree and register
    /// it. The returned identity is handed to the client immediately so
    /// later metadata submission can correlate.
    pub async fn open_session(&self) -> RecorderResult<String> {
        let name = self.sequencer.next_name(&self.prefix).await;
        let session_dir = self.staging_dir.join(&name);
        let clips_dir = session_dir.join(CLIPS_DIR_NAME);
        fs::create_dir_all(&clips_dir)
            .await
            .map_err(|source| RecorderError::Io {
                path: clips_dir,
                source,
            })?;
        self.registry
            .insert(RecordingSession::new(name.clone(), session_dir));
        info!(session = %name, "opened recording session");
        Ok(name)
    }

    /// Write one arriving chunk as the session's next clip file.
    ///
    /// Sequence numbers are assigned strictly in receipt order; callers
    /// must not interleave chunks of one session across tasks.
    pub async fn append_chunk(&self, session: &str, data: &[u8]) -> RecorderResult<ClipAck> {
        let seq = self
            .registry
            .begin_clip(session)
            .ok_or_else(|| RecorderError::SessionNotFound(session.to_string()))?;
        let file_name = format!("{CLIP_FILE_PREFIX}{seq:03}.{}", self.clip_extension);
        let clips_dir = self.staging_dir.join(session).join(CLIPS_DIR_NAME);
        let part_path = clips_dir.join(format!("{file_name}.part"));
        let final_path = clips_dir.join(&file_name);

        if let Err(err) = write_clip_file(&part_path, &final_path, data).await {
            // Give the reserved number back so the next successful chunk
            // keeps the sequence contiguous.
            let _ = fs::remove_file(&part_path).await;
            self.registry.abort_clip(session);
            return Err(err);
        }

        self.registry.finish_clip(
            session,
            ClipDescriptor {
                seq,
                file_name: file_name.clone(),
                size_bytes: data.len() as u64,
                source_span: None,
                upload: UploadState::Pending,
            },
        );
        debug!(session, seq, clip = %file_name, bytes = data.len(), "finalized clip");
        Ok(ClipAck {
            session: session.to_string(),
            seq,
            file_name,
        })
    }

    /// Drive an open session from a stream of binary chunks, emitting one
    /// ack per finalized clip.
    ///
    /// Stream end (client disconnect included) is not an error: written
    /// clips are retained and the session stays open for metadata
    /// submission.
    pub async fn serve_stream<S>(
        &self,
        session: &str,
        mut chunks: S,
        acks: mpsc::Sender<ClipAck>,
    ) -> RecorderResult<()>
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        while let Some(chunk) = chunks.next().await {
            let ack = self.append_chunk(session, &chunk).await?;
            if acks.send(ack).await.is_err() {
                // Receiver gone; stop acking but keep the session.
                break;
            }
        }
        info!(session, "recording stream closed");
        Ok(())
    }

    /// Write the session's patient metadata into its staging directory.
    /// Valid after disconnect: the staging subtree outlives the stream.
    pub async fn submit_patient_info(
        &self,
        session: &str,
        info: &PatientInfo,
    ) -> RecorderResult<PathBuf> {
        let session_dir = self.staging_dir.join(session);
        let known = self.registry.contains(session)
            || fs::metadata(&session_dir)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
        if !known {
            return Err(RecorderError::SessionNotFound(session.to_string()));
        }
        let path = session_dir.join(PATIENT_INFO_NAME);
        fs::write(&path, info.render())
            .await
            .map_err(|source| RecorderError::Io {
                path: path.clone(),
                source,
            })?;
        info!(session, "stored patient info");
        Ok(path)
    }

    /// Remove the session from the registry. Clip files stay on disk.
    pub fn finalize(&self, session: &str) -> Option<RecordingSession> {
        let removed = self.registry.remove(session);
        if removed.is_some() {
            info!(session, "finalized recording session");
        }
        removed
    }
}

async fn write_clip_file(part: &Path, dest: &Path, data: &[u8]) -> RecorderResult<()> {
    let mut file = fs::File::create(part)
        .await
        .map_err(|source| RecorderError::Io {
            path: part.to_path_buf(),
            source,
        })?;
    file.write_all(data)
        .await
        .map_err(|source| RecorderError::Io {
            path: part.to_path_buf(),
            source,
        })?;
    file.flush().await.map_err(|source| RecorderError::Io {
        path: part.to_path_buf(),
        source,
    })?;
    drop(file);
    fs::rename(part, dest)
        .await
        .map_err(|source| RecorderError::Io {
            path: dest.to_path_buf(),
            source,
        })
}
