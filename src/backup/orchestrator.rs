// dbbackup/src/backup/orchestrator.rs
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use super::naming::{backup_name, format_size, parse_backup_name};
use super::retention::RetentionPolicy;
use crate::database::DatabaseManager;
use crate::errors::{BackupError, Result};
use crate::staging::StagingArea;
use crate::storage::StorageManager;

/// Source of "now" for naming and retention.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A backup as found in storage. Rebuilt from the backend listing on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub filename: String,
    /// Parsed from the filename, not taken from backend metadata.
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub size_human: String,
}

/// Ties a database and one storage backend together into the backup workflow.
///
/// Every operation runs to completion before returning; the orchestrator is not meant to be
/// driven by concurrent callers.
pub struct BackupOrchestrator {
    database: Box<dyn DatabaseManager>,
    storage: Box<dyn StorageManager>,
    staging: StagingArea,
    keep_local: bool,
    clock: Clock,
}

impl BackupOrchestrator {
    pub fn new(
        database: Box<dyn DatabaseManager>,
        storage: Box<dyn StorageManager>,
        staging: StagingArea,
    ) -> Self {
        BackupOrchestrator {
            database,
            storage,
            staging,
            keep_local: false,
            clock: Box::new(Utc::now),
        }
    }

    /// Keep a copy of each uploaded dump in the staging directory, named like the backup.
    pub fn keep_local(mut self, keep: bool) -> Self {
        self.keep_local = keep;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage_name(&self) -> String {
        self.storage.name()
    }

    pub fn database_target(&self) -> String {
        self.database.describe()
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.storage.is_connected() {
            self.storage.connect().await?;
        }
        Ok(())
    }

    /// Dumps the database and uploads it. Returns the remote name of the new backup.
    ///
    /// The staged dump is removed on every path; a failed upload leaves nothing behind.
    pub async fn create_backup(&self) -> Result<String> {
        self.ensure_connected().await?;
        self.database.check_connection().await?;

        info!("🚀 Creating backup of {}", self.database.describe());
        let staged = self.database.create_dump(&self.staging).await?;
        let remote_name = backup_name((self.clock)(), is_compressed(staged.path()));
        let size = staged.size()?;
        info!("Dump ready: {} ({})", remote_name, format_size(size));

        if let Err(e) = self.storage.upload(staged.path(), &remote_name).await {
            error!("Upload of {} failed, discarding the dump", remote_name);
            return Err(e);
        }

        if self.keep_local {
            let dest = self.staging.dir().join(&remote_name);
            match staged.persist(&dest) {
                Ok(path) => info!("Kept local copy at {}", path.display()),
                Err(e) => warn!("Backup uploaded but the local copy could not be kept: {}", e),
            }
        } else if let Err(e) = staged.discard() {
            warn!("Backup uploaded but the staged dump could not be removed: {}", e);
        }

        info!("✅ Backup {} stored in {}", remote_name, self.storage.name());
        Ok(remote_name)
    }

    /// All backups in storage, newest first. Objects not following the naming convention
    /// are ignored.
    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.ensure_connected().await?;

        let objects = self.storage.list().await?;
        let total = objects.len();
        let mut records: Vec<BackupRecord> = objects
            .into_iter()
            .filter_map(|object| {
                let created_at = parse_backup_name(&object.name)?;
                Some(BackupRecord {
                    created_at,
                    size_human: format_size(object.size_bytes),
                    size_bytes: object.size_bytes,
                    filename: object.name,
                })
            })
            .collect();

        // same-second .sql and .sql.gz backups are ordered by name
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });

        debug!(
            "Found {} backups among {} objects in {}",
            records.len(),
            total,
            self.storage.name()
        );
        Ok(records)
    }

    /// Downloads `name` and feeds it into the database.
    ///
    /// Fails with [`BackupError::NotFound`] before touching the database if the backup does
    /// not exist. The downloaded file is removed whatever the outcome.
    pub async fn restore_backup(&self, name: &str) -> Result<()> {
        self.ensure_connected().await?;

        if !self.storage.exists(name).await? {
            return Err(BackupError::NotFound(format!(
                "{} does not exist in {}",
                name,
                self.storage.name()
            )));
        }

        let extension = if is_compressed(Path::new(name)) { ".sql.gz" } else { ".sql" };
        let staged = self.staging.reserve("restore", extension)?;

        info!("🔄 Restoring {} into {}", name, self.database.describe());
        self.storage.download(name, staged.path()).await?;
        self.database.restore_dump(staged.path()).await?;

        if let Err(e) = staged.discard() {
            warn!("Restore finished but the downloaded dump could not be removed: {}", e);
        }
        info!("✅ Restored {} into {}", name, self.database.describe());
        Ok(())
    }

    /// Deletes every backup created at or before `now - max_age`.
    ///
    /// Individual delete failures are logged and skipped; the returned count only includes
    /// confirmed deletions. A failing listing aborts the sweep.
    pub async fn clean_old_backups(&self, policy: &RetentionPolicy) -> Result<usize> {
        let now = (self.clock)();
        let Some(cutoff) = policy.cutoff(now) else {
            info!("Retention keeps backups forever, nothing to clean");
            return Ok(0);
        };

        info!("🧹 Removing backups created at or before {}", cutoff.format("%Y-%m-%d %H:%M:%S UTC"));
        let expired: Vec<BackupRecord> = self
            .list_backups()
            .await?
            .into_iter()
            .filter(|record| policy.is_expired(record.created_at, now))
            .collect();

        let mut deleted = 0;
        for record in &expired {
            match self.storage.delete(&record.filename).await {
                Ok(()) => {
                    info!("Deleted expired backup {}", record.filename);
                    deleted += 1;
                }
                Err(e) => warn!("Skipping {}: {}", record.filename, e),
            }
        }

        if deleted < expired.len() {
            warn!(
                "Deleted {} of {} expired backups; the rest will be retried on the next run",
                deleted,
                expired.len()
            );
        } else {
            info!("Deleted {} expired backups", deleted);
        }
        Ok(deleted)
    }

    /// Deletes a single backup by name.
    pub async fn delete_backup(&self, name: &str) -> Result<()> {
        self.ensure_connected().await?;

        if !self.storage.exists(name).await? {
            return Err(BackupError::NotFound(format!(
                "{} does not exist in {}",
                name,
                self.storage.name()
            )));
        }
        self.storage.delete(name).await?;
        info!("Deleted backup {}", name);
        Ok(())
    }

    /// Empties the local staging directory.
    pub fn purge_staging(&self) -> Result<usize> {
        self.staging.purge()
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}
