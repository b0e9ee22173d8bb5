use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Database dump of '{database}' failed: {reason}")]
    Dump { database: String, reason: String },

    #[error("Database restore from {} failed: {reason}", path.display())]
    Restore { path: PathBuf, reason: String },

    #[error("Connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("Upload of {} as '{remote}' failed: {reason}", local.display())]
    Upload {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("Download of '{remote}' failed: {reason}")]
    Download { remote: String, reason: String },

    #[error("Delete of '{remote}' failed: {reason}")]
    Delete { remote: String, reason: String },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Storage listing failed: {0}")]
    List(String),

    #[error("Staging area I/O error: {0}")]
    Staging(#[from] std::io::Error),
}

impl BackupError {
    pub(crate) fn dump(database: &str, reason: impl ToString) -> Self {
        BackupError::Dump {
            database: database.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn restore(path: &std::path::Path, reason: impl ToString) -> Self {
        BackupError::Restore {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn connection(target: impl ToString, reason: impl ToString) -> Self {
        BackupError::Connection {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn upload(local: &std::path::Path, remote: &str, reason: impl ToString) -> Self {
        BackupError::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn download(remote: &str, reason: impl ToString) -> Self {
        BackupError::Download {
            remote: remote.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delete(remote: &str, reason: impl ToString) -> Self {
        BackupError::Delete {
            remote: remote.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
