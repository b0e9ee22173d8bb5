//! Remote storage backends for finished dumps.
//!
//! Every backend implements [`StorageManager`]; the orchestrator never sees the concrete type.
//!
//! - [`S3Storage`]: S3-compatible object stores (MinIO, AWS S3, DigitalOcean Spaces)
//! - [`GoogleDriveStorage`]: a folder in Google Drive

pub mod google_drive;
pub mod s3;

pub use google_drive::GoogleDriveStorage;
pub use s3::S3Storage;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StorageConfig;
use crate::errors::Result;

/// One entry of a backend listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Name relative to the configured prefix or folder.
    pub name: String,
    pub size_bytes: u64,
    /// Modification time as recorded by the backend, if it reports one.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Capability surface shared by all storage backends.
///
/// Each call either fully succeeds or fully fails once it returns; retries happen inside
/// the implementation.
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Human readable backend name for logs.
    fn name(&self) -> String;

    /// Establishes the backend session. Calling it again once connected is a no-op.
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Uploads `local` as `remote`. The object is either fully visible afterwards or not at all.
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    /// Downloads `remote` into `local`. Fails with a download error if `remote` does not exist.
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Lists every object under the configured prefix. Order is unspecified.
    async fn list(&self) -> Result<Vec<RemoteObject>>;

    /// Deletes `remote`. Deleting an absent object is an error.
    async fn delete(&self, remote: &str) -> Result<()>;

    async fn exists(&self, remote: &str) -> Result<bool>;
}

/// Builds the backend selected in the configuration. No connection is made yet.
pub fn storage_manager(config: StorageConfig) -> Box<dyn StorageManager> {
    match config {
        StorageConfig::S3(s3) => Box::new(S3Storage::new(s3)),
        StorageConfig::GoogleDrive(drive) => Box::new(GoogleDriveStorage::new(drive)),
    }
}

/// MIME type sent along with an upload, derived from the file name.
pub(crate) fn content_type_for(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".sql") {
        "application/sql"
    } else if lower.ends_with(".gz") || lower.ends_with(".gzip") {
        "application/gzip"
    } else if lower.ends_with(".zip") {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}
