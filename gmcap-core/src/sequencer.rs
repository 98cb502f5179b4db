//! Derives the next globally unique session folder name.
//!
//! Advisory only: the scan is read-then-increment with no distributed
//! lock, so concurrent assignments may race. Safety rests on the store's
//! idempotent create-or-reuse folder creation; no collision retry is
//! attempted here.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::store::{ChildFilter, RemoteStore, StoreResult};

pub struct FolderSequencer {
    store: Arc<dyn RemoteStore>,
    staging_dir: PathBuf,
}

impl FolderSequencer {
    pub fn new<P: Into<PathBuf>>(store: Arc<dyn RemoteStore>, staging_dir: P) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
        }
    }

    /// `<prefix><max + 1>`, from the remote top-level listing. Only when
    /// the remote is unreachable does the local staging directory decide;
    /// a reachable remote is authoritative even over newer-looking local
    /// directories.
    pub async fn next_name(&self, prefix: &str) -> String {
        match self.max_remote(prefix).await {
            Ok(max) => format!("{prefix}{}", max + 1),
            Err(err) => {
                warn!(error = %err, "remote folder listing failed, falling back to local scan");
                format!("{prefix}{}", self.max_local(prefix) + 1)
            }
        }
    }

    async fn max_remote(&self, prefix: &str) -> StoreResult<u64> {
        let root = self.store.root().await?;
        let children = self
            .store
            .list_children(&root, ChildFilter::FoldersOnly)
            .await?;
        Ok(max_sequence(
            prefix,
            children.iter().map(|entry| entry.name.as_str()),
        ))
    }

    fn max_local(&self, prefix: &str) -> u64 {
        let entries = match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        max_sequence(prefix, names.iter().map(String::as_str))
    }
}

/// Largest trailing integer among names matching `<prefix><digits>`; 0 if
/// none match.
pub fn max_sequence<'a>(prefix: &str, names: impl Iterator<Item = &'a str>) -> u64 {
    let pattern = Regex::new(&format!("^{}(\\d+)$", regex::escape(prefix)))
        .expect("folder name pattern is valid");
    names
        .filter_map(|name| pattern.captures(name))
        .filter_map(|captures| captures[1].parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}
