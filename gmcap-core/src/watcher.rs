//! Auto-upload watcher over the staging tree.
//!
//! Periodically scans the staging area for finalized clips (files inside a
//! `Clips` directory, final name, mtime settled) and uploads each to its
//! session's remote folder. Upload failures are logged, counted, and never
//! halt the loop; an unuploaded clip is simply picked up again on a later
//! scan.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::SessionArchive;
use crate::session::CLIPS_DIR_NAME;

const PART_SUFFIX: &str = "part";

pub struct AutoUploadWatcher {
    staging_dir: PathBuf,
    archive: Arc<SessionArchive>,
    poll_interval: Duration,
    settle: Duration,
    seen: Mutex<HashSet<PathBuf>>,
    errors: AtomicU64,
}

impl AutoUploadWatcher {
    pub fn new<P: Into<PathBuf>>(
        staging_dir: P,
        archive: Arc<SessionArchive>,
        poll_interval: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            archive,
            poll_interval,
            settle,
            seen: Mutex::new(HashSet::new()),
            errors: AtomicU64::new(0),
        }
    }

    /// Number of swallowed upload failures since start. Failures are
    /// policy here, not propagation; this counter keeps them diagnosable.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Run the watch loop forever. Owners stop it by dropping the task.
    pub async fn run(&self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(staging = %self.staging_dir.display(), "starting auto-upload watcher");
        loop {
            ticker.tick().await;
            self.scan_once().await;
        }
    }

    /// One scan-and-upload pass. Public for tests and one-shot callers.
    pub async fn scan_once(&self) {
        for (session, path) in self.collect_pending() {
            match self.archive.upload_clip(&session, &path).await {
                Ok(id) => {
                    self.seen.lock().unwrap().insert(path.clone());
                    debug!(session, clip = %path.display(), remote_id = %id, "clip uploaded");
                }
                Err(err) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        session,
                        clip = %path.display(),
                        error = %err,
                        "clip upload failed, leaving for a later scan"
                    );
                }
            }
        }
    }

    fn collect_pending(&self) -> Vec<(String, PathBuf)> {
        let mut seen = self.seen.lock().unwrap();
        // Uploaded files eventually disappear from staging; drop their
        // entries so the set tracks live files only.
        seen.retain(|path| path.exists());
        let mut pending = Vec::new();
        for entry in WalkDir::new(&self.staging_dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .extension()
                .map(|ext| ext == PART_SUFFIX)
                .unwrap_or(false)
            {
                continue;
            }
            let Some(parent) = path.parent() else {
                continue;
            };
            if parent.file_name().map(|n| n != CLIPS_DIR_NAME).unwrap_or(true) {
                continue;
            }
            let Some(session) = parent
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            if seen.contains(path) {
                continue;
            }
            if !self.settled(&entry) {
                continue;
            }
            pending.push((session, path.to_path_buf()));
        }
        pending.sort();
        pending
    }

    fn settled(&self, entry: &walkdir::DirEntry) -> bool {
        if self.settle.is_zero() {
            return true;
        }
        let Ok(meta) = entry.metadata() else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return true;
        };
        modified
            .elapsed()
            .map(|age| age >= self.settle)
            .unwrap_or(true)
    }
}
