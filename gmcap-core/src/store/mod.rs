//! Remote hierarchical object store, consumed as an opaque capability.

mod local;
mod space;

pub use local::FsRemoteStore;
pub use space::{DriveSpace, SpaceTracker};

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote folder not found: {0}")]
    FolderNotFound(String),
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("upload of {name} failed: {detail}")]
    Upload { name: String, detail: String },
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque identity of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderId(pub String);

/// Opaque identity of a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId(pub String);

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFilter {
    Any,
    FoldersOnly,
    FilesOnly,
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub id: String,
    pub is_folder: bool,
}

/// The store capability the pipeline consumes. Folder creation must be
/// idempotent (create-or-reuse on name collision); that is the safety
/// precondition the folder sequencer relies on.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Identity of the top-level folder.
    async fn root(&self) -> StoreResult<FolderId>;

    /// Create `path` (relative to root), creating missing segments.
    /// Returns the existing identity when the folder is already present.
    async fn create_folder(&self, path: &str) -> StoreResult<FolderId>;

    /// Look up `path` without creating it.
    async fn find_folder(&self, path: &str) -> StoreResult<Option<FolderId>>;

    async fn list_children(
        &self,
        folder: &FolderId,
        filter: ChildFilter,
    ) -> StoreResult<Vec<RemoteEntry>>;

    /// Upload `local` into `folder` under `remote_name` (defaults to the
    /// local file name). If an object of that name already exists, returns
    /// its identity without transferring.
    async fn upload_if_absent(
        &self,
        folder: &FolderId,
        local: &Path,
        remote_name: Option<&str>,
    ) -> StoreResult<FileId>;

    async fn read_text_blob(&self, folder: &FolderId, name: &str) -> StoreResult<String>;

    async fn write_text_blob(&self, folder: &FolderId, name: &str, content: &str)
        -> StoreResult<()>;

    async fn download_file(&self, id: &FileId, local: &Path) -> StoreResult<()>;
}
