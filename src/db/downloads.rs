//! Download record CRUD and compare-and-set status updates.

use crate::error::{DatabaseError, DownloadError};
use crate::types::Status;
use crate::{Error, Result};
use sqlx::error::DatabaseError as _;

use super::{Database, DownloadRecord, NewDownloadRecord, RecordUpdate};

impl Database {
    /// Insert a new download record
    ///
    /// Fails with [`DatabaseError::ConstraintViolation`] if the name is taken.
    pub async fn insert_download(&self, record: &NewDownloadRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO downloads (
                name, source_target, package_number, size_bytes, status,
                failure_kind, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.name)
        .bind(&record.source_target)
        .bind(i64::from(record.package_number))
        .bind(i64::try_from(record.size_bytes).unwrap_or(i64::MAX))
        .bind(record.status.to_i32())
        .bind(record.failure_kind.map(|k| k.as_str()))
        .bind(&record.error_message)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "Download record already exists: {}",
                    record.name
                )))
            }
            e => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download: {}",
                e
            ))),
        })?;

        Ok(())
    }

    /// Get a download by file name
    pub async fn get_download(&self, name: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT
                name, source_target, package_number, size_bytes, status,
                digest, storage_path, failure_kind, error_message,
                created_at, updated_at
            FROM downloads
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all downloads
    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT
                name, source_target, package_number, size_bytes, status,
                digest, storage_path, failure_kind, error_message,
                created_at, updated_at
            FROM downloads
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List downloads with a specific status
    pub async fn list_downloads_by_status(&self, status: Status) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT
                name, source_target, package_number, size_bytes, status,
                digest, storage_path, failure_kind, error_message,
                created_at, updated_at
            FROM downloads
            WHERE status = ?
            ORDER BY created_at ASC, name ASC
            "#,
        )
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloads by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Apply a compare-and-set status change
    ///
    /// The `WHERE status = ?` clause makes the check and the write one statement,
    /// so two writers can never both move the same record out of one status.
    pub async fn update_download(&self, update: &RecordUpdate) -> Result<()> {
        if !update.expected.can_transition_to(update.status) {
            return Err(Error::Download(DownloadError::InvalidTransition {
                name: update.name.clone(),
                from: update.expected,
                to: update.status,
            }));
        }

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE downloads SET
                status = ?,
                digest = COALESCE(?, digest),
                storage_path = COALESCE(?, storage_path),
                failure_kind = COALESCE(?, failure_kind),
                error_message = COALESCE(?, error_message),
                updated_at = ?
            WHERE name = ? AND status = ?
            "#,
        )
        .bind(update.status.to_i32())
        .bind(&update.digest)
        .bind(&update.storage_path)
        .bind(update.failure_kind.map(|k| k.as_str()))
        .bind(&update.error_message)
        .bind(now)
        .bind(&update.name)
        .bind(update.expected.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(match self.get_download(&update.name).await? {
                Some(_) => Error::Download(DownloadError::StatusMismatch {
                    name: update.name.clone(),
                    expected: update.expected,
                }),
                None => Error::Download(DownloadError::NotFound {
                    name: update.name.clone(),
                }),
            });
        }

        Ok(())
    }

    /// Delete a download record
    ///
    /// For external reconciliation: clearing a failed record lets the same file
    /// be requested again. The acquisition pipeline never deletes records.
    /// Returns whether a record was removed.
    pub async fn delete_download(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
