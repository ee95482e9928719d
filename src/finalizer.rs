//! Integrity and publication finalizer
//!
//! Turns a completed local file into a published one: SHA-256 over the stored
//! bytes (uppercase hex), an optional size check against the offer, then an
//! upload to the [`StorageTarget`] under `<logical_root><separator><name>`.
//!
//! Digest and size problems are [`AcquisitionError::IntegrityFailed`]; upload
//! problems are [`AcquisitionError::PublishFailed`], so the ledger can tell
//! transfer-layer faults from storage-layer ones.

use crate::config::{DownloadConfig, StorageConfig};
use crate::error::AcquisitionError;
use crate::storage::{PublishFile, StorageTarget};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Verified content of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Uppercase hex SHA-256
    pub digest: String,
    /// Bytes hashed
    pub size_bytes: u64,
}

/// Result of [`Finalizer::finalize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Uppercase hex SHA-256
    pub digest: String,
    /// Path returned by the storage target
    pub storage_path: String,
}

/// Verifies and publishes completed transfers
pub struct Finalizer {
    storage: Arc<dyn StorageTarget>,
    storage_config: StorageConfig,
    verify_size: bool,
}

impl Finalizer {
    /// Create a finalizer that publishes through `storage`
    pub fn new(
        storage: Arc<dyn StorageTarget>,
        storage_config: StorageConfig,
        download_config: &DownloadConfig,
    ) -> Self {
        Self {
            storage,
            storage_config,
            verify_size: download_config.verify_size,
        }
    }

    /// Canonical storage path for a file name
    pub fn storage_path(&self, file_name: &str) -> String {
        self.storage_config.storage_path(file_name)
    }

    /// Hash the file and, if enabled, check its size against `declared_size`
    pub async fn verify(
        &self,
        local_path: &Path,
        file_name: &str,
        declared_size: u64,
    ) -> Result<Verified, AcquisitionError> {
        let verified = compute_digest(local_path)
            .await
            .map_err(|e| AcquisitionError::IntegrityFailed {
                name: file_name.to_string(),
                reason: format!("failed to hash {}: {}", local_path.display(), e),
            })?;

        if self.verify_size && verified.size_bytes != declared_size {
            return Err(AcquisitionError::IntegrityFailed {
                name: file_name.to_string(),
                reason: format!(
                    "received {} bytes, offer declared {}",
                    verified.size_bytes, declared_size
                ),
            });
        }

        tracing::debug!(
            file_name,
            digest = %verified.digest,
            size_bytes = verified.size_bytes,
            "Verified downloaded file"
        );

        Ok(verified)
    }

    /// Upload the file and return the path the storage target reports
    pub async fn publish(
        &self,
        local_path: &Path,
        file_name: &str,
    ) -> Result<String, AcquisitionError> {
        let file = PublishFile {
            local_path: local_path.to_path_buf(),
            storage_path: self.storage_path(file_name),
            file_name: file_name.to_string(),
        };

        let storage_path =
            self.storage
                .upload(&file)
                .await
                .map_err(|e| AcquisitionError::PublishFailed {
                    name: file_name.to_string(),
                    reason: e.to_string(),
                })?;

        tracing::debug!(
            file_name,
            storage = self.storage.name(),
            storage_path = %storage_path,
            "Published file"
        );

        Ok(storage_path)
    }

    /// Verify then publish in one call
    ///
    /// One-call form of [`verify`](Self::verify) followed by
    /// [`publish`](Self::publish), for callers that do not record the stage in
    /// between. The acquisition pipeline calls the two steps separately so the
    /// ledger moves through `Verifying` and `Publishing`.
    pub async fn finalize(
        &self,
        local_path: &Path,
        file_name: &str,
        declared_size: u64,
    ) -> Result<Finalized, AcquisitionError> {
        let verified = self.verify(local_path, file_name, declared_size).await?;
        let storage_path = self.publish(local_path, file_name).await?;
        Ok(Finalized {
            digest: verified.digest,
            storage_path,
        })
    }
}

/// Stream a file through SHA-256
pub async fn compute_digest(path: &Path) -> std::io::Result<Verified> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut size_bytes = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }

    Ok(Verified {
        digest: format!("{:X}", hasher.finalize()),
        size_bytes,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;

    // sha256("hello world")
    const HELLO_DIGEST: &str = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";

    struct FailingStorage;

    #[async_trait]
    impl StorageTarget for FailingStorage {
        async fn upload(&self, _file: &PublishFile) -> Result<String> {
            Err(Error::Storage("quota exceeded".into()))
        }
    }

    struct EchoStorage;

    #[async_trait]
    impl StorageTarget for EchoStorage {
        async fn upload(&self, file: &PublishFile) -> Result<String> {
            Ok(file.storage_path.clone())
        }
    }

    fn finalizer(storage: Arc<dyn StorageTarget>, verify_size: bool) -> Finalizer {
        let download = DownloadConfig {
            verify_size,
            ..DownloadConfig::default()
        };
        Finalizer::new(storage, StorageConfig::default(), &download)
    }

    async fn write_temp(content: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Episode01.mkv");
        tokio::fs::write(&path, content).await.unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn digest_is_uppercase_sha256_hex() {
        let (_dir, path) = write_temp(b"hello world").await;

        let verified = compute_digest(&path).await.unwrap();

        assert_eq!(verified.digest, HELLO_DIGEST);
        assert_eq!(verified.size_bytes, 11);
    }

    #[tokio::test]
    async fn digest_spans_multiple_chunks() {
        let content = vec![0xABu8; HASH_CHUNK_SIZE * 2 + 17];
        let (_dir, path) = write_temp(&content).await;

        let verified = compute_digest(&path).await.unwrap();

        let expected = format!("{:X}", Sha256::digest(&content));
        assert_eq!(verified.digest, expected);
        assert_eq!(verified.size_bytes, content.len() as u64);
    }

    #[tokio::test]
    async fn finalize_returns_digest_and_canonical_path() {
        let (_dir, path) = write_temp(b"hello world").await;
        let finalizer = finalizer(Arc::new(EchoStorage), true);

        let finalized = finalizer.finalize(&path, "Episode01.mkv", 11).await.unwrap();

        assert_eq!(finalized.digest, HELLO_DIGEST);
        assert_eq!(finalized.storage_path, "Files/Episode01.mkv");
    }

    #[tokio::test]
    async fn size_mismatch_is_integrity_failure_when_enabled() {
        let (_dir, path) = write_temp(b"hello world").await;

        let strict = finalizer(Arc::new(EchoStorage), true);
        let err = strict.verify(&path, "Episode01.mkv", 4096).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::IntegrityFailed { .. }));

        let lenient = finalizer(Arc::new(EchoStorage), false);
        assert!(lenient.verify(&path, "Episode01.mkv", 4096).await.is_ok());
    }

    #[tokio::test]
    async fn missing_file_is_integrity_failure() {
        let dir = tempfile::tempdir().unwrap();
        let finalizer = finalizer(Arc::new(EchoStorage), true);

        let err = finalizer
            .verify(&dir.path().join("gone.mkv"), "gone.mkv", 0)
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::IntegrityFailed { .. }));
    }

    #[tokio::test]
    async fn upload_failure_is_publish_failure() {
        let (_dir, path) = write_temp(b"hello world").await;
        let finalizer = finalizer(Arc::new(FailingStorage), true);

        let err = finalizer.finalize(&path, "Episode01.mkv", 11).await.unwrap_err();

        match err {
            AcquisitionError::PublishFailed { name, reason } => {
                assert_eq!(name, "Episode01.mkv");
                assert!(reason.contains("quota exceeded"));
            }
            other => panic!("expected PublishFailed, got {other:?}"),
        }
    }
}
