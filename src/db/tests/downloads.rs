use crate::db::*;
use crate::error::{DatabaseError, DownloadError};
use crate::types::{FailureKind, Status};
use crate::Error;
use tempfile::NamedTempFile;

async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

#[tokio::test]
async fn test_insert_and_get_download() {
    let (db, _file) = open().await;

    db.insert_download(&NewDownloadRecord::downloading(
        "Episode01.mkv",
        "Seeder1",
        42,
        1024 * 1024 * 350,
    ))
    .await
    .unwrap();

    let record = db.get_download("Episode01.mkv").await.unwrap().unwrap();
    assert_eq!(record.name, "Episode01.mkv");
    assert_eq!(record.source_target, "Seeder1");
    assert_eq!(record.package_number, 42);
    assert_eq!(record.size_bytes, 1024 * 1024 * 350);
    assert_eq!(record.status(), Status::Downloading);
    assert!(record.digest.is_none());
    assert!(record.storage_path.is_none());
    assert!(record.failure_kind().is_none());
    assert!(record.created_at > 0);

    assert!(db.get_download("Episode02.mkv").await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_duplicate_insert_is_constraint_violation() {
    let (db, _file) = open().await;
    let record = NewDownloadRecord::downloading("dup.mkv", "Seeder1", 1, 10);

    db.insert_download(&record).await.unwrap();
    let err = db.insert_download(&record).await.unwrap_err();

    assert!(
        matches!(err, Error::Database(DatabaseError::ConstraintViolation(_))),
        "got {err:?}"
    );

    db.close().await;
}

#[tokio::test]
async fn test_full_success_chain_stores_digest_and_path() {
    let (db, _file) = open().await;
    let name = "Episode01.mkv";
    db.insert_download(&NewDownloadRecord::downloading(name, "Seeder1", 42, 5))
        .await
        .unwrap();

    db.update_download(&RecordUpdate::advance(
        name,
        Status::Downloading,
        Status::Verifying,
    ))
    .await
    .unwrap();
    db.update_download(
        &RecordUpdate::advance(name, Status::Verifying, Status::Publishing).with_digest("ABCDEF"),
    )
    .await
    .unwrap();
    db.update_download(
        &RecordUpdate::advance(name, Status::Publishing, Status::Available)
            .with_storage_path("Files/Episode01.mkv"),
    )
    .await
    .unwrap();

    let record = db.get_download(name).await.unwrap().unwrap();
    assert_eq!(record.status(), Status::Available);
    assert_eq!(record.digest.as_deref(), Some("ABCDEF"));
    assert_eq!(record.storage_path.as_deref(), Some("Files/Episode01.mkv"));
    assert!(record.updated_at >= record.created_at);

    db.close().await;
}

#[tokio::test]
async fn test_skipping_a_stage_is_rejected_before_touching_the_row() {
    let (db, _file) = open().await;
    db.insert_download(&NewDownloadRecord::downloading("skip.mkv", "Seeder1", 1, 5))
        .await
        .unwrap();

    let err = db
        .update_download(&RecordUpdate::advance(
            "skip.mkv",
            Status::Downloading,
            Status::Available,
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Download(DownloadError::InvalidTransition {
            from: Status::Downloading,
            to: Status::Available,
            ..
        })
    ));
    let record = db.get_download("skip.mkv").await.unwrap().unwrap();
    assert_eq!(record.status(), Status::Downloading);

    db.close().await;
}

#[tokio::test]
async fn test_stale_expected_status_is_a_mismatch() {
    let (db, _file) = open().await;
    db.insert_download(&NewDownloadRecord::downloading("cas.mkv", "Seeder1", 1, 5))
        .await
        .unwrap();
    db.update_download(&RecordUpdate::advance(
        "cas.mkv",
        Status::Downloading,
        Status::Verifying,
    ))
    .await
    .unwrap();

    // A second writer still believes the record is Downloading
    let err = db
        .update_download(&RecordUpdate::fail(
            "cas.mkv",
            Status::Downloading,
            FailureKind::Abandoned,
            "late",
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Download(DownloadError::StatusMismatch {
            expected: Status::Downloading,
            ..
        })
    ));
    let record = db.get_download("cas.mkv").await.unwrap().unwrap();
    assert_eq!(record.status(), Status::Verifying);
    assert!(record.error_message.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_update_of_missing_record_is_not_found() {
    let (db, _file) = open().await;

    let err = db
        .update_download(&RecordUpdate::advance(
            "ghost.mkv",
            Status::Downloading,
            Status::Verifying,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download(DownloadError::NotFound { .. })));

    db.close().await;
}

#[tokio::test]
async fn test_terminal_records_cannot_move() {
    let (db, _file) = open().await;
    db.insert_download(&NewDownloadRecord::failed(
        "dead.mkv",
        "Seeder1",
        3,
        FailureKind::NoOfferReceived,
        "no offer",
    ))
    .await
    .unwrap();

    let err = db
        .update_download(&RecordUpdate::advance(
            "dead.mkv",
            Status::Failed,
            Status::Downloading,
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Download(DownloadError::InvalidTransition { .. })
    ));

    let record = db.get_download("dead.mkv").await.unwrap().unwrap();
    assert_eq!(record.status(), Status::Failed);
    assert_eq!(record.failure_kind(), Some(FailureKind::NoOfferReceived));
    assert_eq!(record.size_bytes, 0);
    assert_eq!(record.error_message.as_deref(), Some("no offer"));

    db.close().await;
}

#[tokio::test]
async fn test_list_by_status_and_delete() {
    let (db, _file) = open().await;
    for name in ["a.mkv", "b.mkv", "c.mkv"] {
        db.insert_download(&NewDownloadRecord::downloading(name, "Seeder1", 1, 5))
            .await
            .unwrap();
    }
    db.update_download(&RecordUpdate::fail(
        "b.mkv",
        Status::Downloading,
        FailureKind::TransferFailed,
        "reset by peer",
    ))
    .await
    .unwrap();

    let downloading = db
        .list_downloads_by_status(Status::Downloading)
        .await
        .unwrap();
    let names: Vec<_> = downloading.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a.mkv", "c.mkv"]);

    let failed = Ledger::list_by_status(&db, Status::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_kind(), Some(FailureKind::TransferFailed));

    assert!(db.delete_download("b.mkv").await.unwrap());
    assert!(!db.delete_download("b.mkv").await.unwrap());
    assert_eq!(db.list_downloads().await.unwrap().len(), 2);

    db.close().await;
}

#[tokio::test]
async fn test_ledger_trait_delegates_to_database() {
    let (db, _file) = open().await;
    let ledger: &dyn Ledger = &db;

    ledger
        .insert(&NewDownloadRecord::downloading("t.mkv", "Seeder1", 9, 1))
        .await
        .unwrap();
    ledger
        .update(&RecordUpdate::advance(
            "t.mkv",
            Status::Downloading,
            Status::Verifying,
        ))
        .await
        .unwrap();

    let record = ledger.find_by_key("t.mkv").await.unwrap().unwrap();
    assert_eq!(record.status(), Status::Verifying);

    db.close().await;
}
