//! Reconciliation loop against the eventually-consistent remote store.
//!
//! Each pass appends remote sessions missing from the local ledger and
//! never touches existing rows, even when remote metadata has since
//! changed. Single-flight falls out of the sequential awaits: a new pass
//! cannot start before the previous one returns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::archive::{ArchiveError, SessionArchive};
use crate::ledger::{LedgerError, SessionLedger};
use crate::session::SessionRecord;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

pub struct ReconciliationSync {
    archive: Arc<SessionArchive>,
    ledger: SessionLedger,
    interval: Duration,
    errors: AtomicU64,
}

impl ReconciliationSync {
    pub fn new(archive: Arc<SessionArchive>, ledger: SessionLedger, interval: Duration) -> Self {
        Self {
            archive,
            ledger,
            interval,
            errors: AtomicU64::new(0),
        }
    }

    /// Number of failed passes since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Run the loop forever. A failed pass is logged and counted; the
    /// loop continues at the next interval.
    pub async fn run(&self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "starting reconciliation loop");
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(appended) if appended > 0 => {
                    info!(appended, "reconciled remote sessions into local ledger");
                }
                Ok(_) => {}
                Err(err) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "reconciliation pass failed");
                }
            }
        }
    }

    /// One reconciliation pass. Returns the number of appended records.
    pub async fn run_once(&self) -> SyncResult<usize> {
        let remote = self.archive.list_sessions().await?;
        let known: HashSet<String> = self.ledger.list_names()?.into_iter().collect();
        let mut appended = 0;
        for session in remote {
            if known.contains(&session.folder_name) {
                continue;
            }
            let record = SessionRecord {
                folder_name: session.folder_name.clone(),
                status: session.status,
                comment: session.comment.clone(),
                created_at: Some(Utc::now()),
            };
            if self.ledger.insert_if_absent(&record)? {
                appended += 1;
            }
        }
        Ok(appended)
    }
}
