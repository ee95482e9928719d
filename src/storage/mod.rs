//! Publication targets
//!
//! The finalizer hands each verified file to a [`StorageTarget`]. Remote object
//! stores (FTP, S3, ...) implement the trait outside this crate;
//! [`DirectoryStorage`] publishes into a local directory tree.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A verified local file ready for upload
#[derive(Debug, Clone)]
pub struct PublishFile {
    /// Where the bytes are now
    pub local_path: PathBuf,
    /// Canonical logical path, e.g. `Files/Episode01.mkv`
    pub storage_path: String,
    /// Bare file name
    pub file_name: String,
}

/// Upload-by-handle storage target
///
/// Uploads must be safe to retry: publishing the same file twice overwrites
/// the first copy.
#[async_trait]
pub trait StorageTarget: Send + Sync {
    /// Upload `file` and return the path it is now available under
    async fn upload(&self, file: &PublishFile) -> Result<String>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "storage"
    }
}

/// Publishes into `root_dir/<logical path>` on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root_dir: PathBuf,
    separator: String,
}

impl DirectoryStorage {
    /// Storage rooted at `root_dir`; logical paths are split on `separator`
    pub fn new(root_dir: impl Into<PathBuf>, separator: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            separator: separator.into(),
        }
    }

    /// Storage configured from the `storage` config section
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.root_dir.clone(), config.separator.clone())
    }

    /// Filesystem path a logical storage path maps to
    pub fn resolve(&self, storage_path: &str) -> Result<PathBuf> {
        let mut path = self.root_dir.clone();
        for segment in storage_path.split(self.separator.as_str()) {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Storage(format!(
                    "invalid storage path segment in '{}'",
                    storage_path
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn copy_into_place(source: &Path, dest: &Path) -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        if let Err(e) = tokio::fs::copy(source, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&partial, dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTarget for DirectoryStorage {
    async fn upload(&self, file: &PublishFile) -> Result<String> {
        let dest = self.resolve(&file.storage_path)?;

        Self::copy_into_place(&file.local_path, &dest)
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "failed to publish {} to {}: {}",
                    file.local_path.display(),
                    dest.display(),
                    e
                ))
            })?;

        tracing::debug!(
            file_name = %file.file_name,
            dest = %dest.display(),
            "Published file to directory storage"
        );

        Ok(file.storage_path.clone())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
