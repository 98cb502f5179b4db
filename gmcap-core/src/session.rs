//! Session identities, clip descriptors and patient metadata.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// File name of the per-session metadata blob.
pub const PATIENT_INFO_NAME: &str = "patient.txt";
/// Name of the per-session subdirectory holding finalized clips.
pub const CLIPS_DIR_NAME: &str = "Clips";

/// Review keys maintained inside the metadata blob.
pub const STATUS_KEY: &str = "GMAE_status";
pub const COMMENT_KEY: &str = "Comments";
pub const TIMESTAMP_KEY: &str = "Timestamp";

#[derive(Debug, Error)]
#[error("invalid verification status: {0}")]
pub struct InvalidStatus(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "Pending",
            VerificationStatus::Approved => "Approved",
            VerificationStatus::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Free-text patient metadata: ordered `Key: Value` lines.
///
/// Unknown keys and line order are preserved across updates; the review
/// workflow only ever rewrites its own keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientInfo {
    lines: Vec<(String, String)>,
}

impl PatientInfo {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            lines: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut lines = Vec::new();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once(':') {
                lines.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        Self { lines }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first line carrying `key`, or append one.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.lines.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.lines.push((key.to_string(), value.to_string())),
        }
    }

    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn status(&self) -> VerificationStatus {
        self.get(STATUS_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(VerificationStatus::Pending)
    }

    pub fn comment(&self) -> &str {
        self.get(COMMENT_KEY).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadState {
    Pending,
    Uploaded,
}

/// Span of the source video a segmentation-derived clip covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceSpan {
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipDescriptor {
    pub seq: u32,
    pub file_name: String,
    pub size_bytes: u64,
    pub source_span: Option<SourceSpan>,
    pub upload: UploadState,
}

/// One live recording session, tracked by the session manager's registry.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub name: String,
    pub staging_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub clips: Vec<ClipDescriptor>,
    next_seq: u32,
}

impl RecordingSession {
    pub fn new(name: String, staging_dir: PathBuf) -> Self {
        Self {
            name,
            staging_dir,
            created_at: Utc::now(),
            clips: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }
}

/// A session as observed on the remote store.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub folder_name: String,
    pub info: PatientInfo,
    pub status: VerificationStatus,
    pub comment: String,
}

/// Row shape of the local session ledger.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub folder_name: String,
    pub status: VerificationStatus,
    pub comment: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Registry of live recording sessions, owned by the session manager and
/// passed around by handle. Insert on open, remove on finalize.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, RecordingSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: RecordingSession) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.name.clone(), session);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<RecordingSession> {
        self.sessions.lock().unwrap().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<RecordingSession> {
        self.sessions.lock().unwrap().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    /// Reserve the next clip sequence number for `name`. Sequence numbers
    /// are assigned strictly in call order within one session.
    pub fn begin_clip(&self, name: &str) -> Option<u32> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(name)?;
        session.next_seq += 1;
        Some(session.next_seq)
    }

    /// Release the most recently reserved sequence number after a failed
    /// write, keeping later clips contiguous.
    pub fn abort_clip(&self, name: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(name) {
            Some(session) if session.next_seq > 0 => {
                session.next_seq -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn finish_clip(&self, name: &str, clip: ClipDescriptor) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(name) {
            Some(session) => {
                session.clips.push(clip);
                true
            }
            None => false,
        }
    }
}
