pub mod s3;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Access denied: s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Download of s3://{bucket}/{key} failed: {reason}")]
    DownloadFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Upload to s3://{bucket}/{key} failed: {reason}")]
    UploadFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Get/put against a bucket/key namespace. Neither call retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads `bucket/key` to `dest`, returning the written path.
    async fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<PathBuf>;

    /// Uploads `path` to `bucket/key`, overwriting whatever is there.
    async fn store(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;
}
