//! Local authoritative session record, backed by SQLite.
//!
//! The reconciliation loop appends here; nothing in the pipeline ever
//! mutates or removes an existing row (first-local-write-wins).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::session::{SessionRecord, VerificationStatus};

const LEDGER_SCHEMA: &str = include_str!("../../sql/sessions.sql");

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open session ledger {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on session ledger: {0}")]
    Execute(#[from] rusqlite::Error),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub struct SessionLedger {
    path: PathBuf,
}

impl SessionLedger {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn initialize(&self) -> LedgerResult<()> {
        let conn = self.open()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
    }

    fn open(&self) -> LedgerResult<Connection> {
        let conn = Connection::open(&self.path).map_err(|source| LedgerError::Open {
            source,
            path: self.path.clone(),
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA busy_timeout = 5000;\n",
        )?;
        Ok(conn)
    }

    /// Append a record unless one already exists for the folder name.
    /// Returns whether a row was inserted.
    pub fn insert_if_absent(&self, record: &SessionRecord) -> LedgerResult<bool> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO sessions(folder_name, status, comment, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.folder_name,
                record.status.as_str(),
                record.comment,
                record.created_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn list_names(&self) -> LedgerResult<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT folder_name FROM sessions ORDER BY folder_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn fetch(&self, folder_name: &str) -> LedgerResult<Option<SessionRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT folder_name, status, comment, created_at FROM sessions WHERE folder_name = ?1",
        )?;
        let mut rows = stmt.query_map([folder_name], record_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list(&self, limit: usize) -> LedgerResult<Vec<SessionRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT folder_name, status, comment, created_at FROM sessions \
             ORDER BY folder_name LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn counts_by_status(&self) -> LedgerResult<Vec<(String, i64)>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(1)?;
    let created_at: Option<String> = row.get(3)?;
    Ok(SessionRecord {
        folder_name: row.get(0)?,
        status: status.parse().unwrap_or(VerificationStatus::Pending),
        comment: row.get(2)?,
        created_at: created_at
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc)),
    })
}
