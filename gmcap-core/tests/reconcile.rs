use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use gmcap_core::{
    FsRemoteStore, ReconciliationSync, RemoteStore, SessionArchive, SessionLedger, SessionRecord,
    VerificationStatus,
};

async fn remote_session(store: &FsRemoteStore, name: &str, status: &str) {
    let folder = store.create_folder(name).await.unwrap();
    store
        .write_text_blob(
            &folder,
            "patient.txt",
            &format!("Name: Subject\nGMAE_status: {status}\nComments: remote note"),
        )
        .await
        .unwrap();
}

fn local_record(name: &str, status: VerificationStatus, comment: &str) -> SessionRecord {
    SessionRecord {
        folder_name: name.to_string(),
        status,
        comment: comment.to_string(),
        created_at: Some(Utc::now()),
    }
}

#[tokio::test]
async fn missing_remote_sessions_are_appended() {
    let remote = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    remote_session(&store, "Data1", "Pending").await;
    remote_session(&store, "Data2", "Approved").await;
    remote_session(&store, "Data3", "Pending").await;

    let ledger = SessionLedger::new(data.path().join("sessions.sqlite"));
    ledger.initialize().unwrap();
    ledger
        .insert_if_absent(&local_record("Data1", VerificationStatus::Pending, "local"))
        .unwrap();
    ledger
        .insert_if_absent(&local_record("Data2", VerificationStatus::Pending, "local"))
        .unwrap();

    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let sync = ReconciliationSync::new(archive, ledger.clone(), Duration::from_secs(5));

    let appended = sync.run_once().await.unwrap();
    assert_eq!(appended, 1);
    assert_eq!(ledger.list_names().unwrap(), vec!["Data1", "Data2", "Data3"]);

    let added = ledger.fetch("Data3").unwrap().unwrap();
    assert_eq!(added.status, VerificationStatus::Pending);
    assert_eq!(added.comment, "remote note");
}

#[tokio::test]
async fn existing_rows_survive_remote_drift() {
    let remote = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    // Remote says approved; the local row predates that and must win.
    remote_session(&store, "Data1", "Approved").await;

    let ledger = SessionLedger::new(data.path().join("sessions.sqlite"));
    ledger.initialize().unwrap();
    ledger
        .insert_if_absent(&local_record(
            "Data1",
            VerificationStatus::Pending,
            "awaiting review",
        ))
        .unwrap();

    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let sync = ReconciliationSync::new(archive, ledger.clone(), Duration::from_secs(5));

    assert_eq!(sync.run_once().await.unwrap(), 0);
    let row = ledger.fetch("Data1").unwrap().unwrap();
    assert_eq!(row.status, VerificationStatus::Pending);
    assert_eq!(row.comment, "awaiting review");
}

#[tokio::test]
async fn sessions_without_metadata_are_skipped() {
    let remote = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let store = Arc::new(FsRemoteStore::new(remote.path()));
    remote_session(&store, "Data1", "Pending").await;
    // A clips-only folder whose metadata blob has not arrived yet.
    store.create_folder("Data2/Clips").await.unwrap();

    let ledger = SessionLedger::new(data.path().join("sessions.sqlite"));
    ledger.initialize().unwrap();

    let archive = Arc::new(SessionArchive::new(store, 15.0, cache.path(), "Data"));
    let sync = ReconciliationSync::new(archive, ledger.clone(), Duration::from_secs(5));

    assert_eq!(sync.run_once().await.unwrap(), 1);
    assert_eq!(ledger.list_names().unwrap(), vec!["Data1"]);
}
