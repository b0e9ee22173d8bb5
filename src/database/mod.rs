//! Database dump and restore through the engines' native client tools.
//!
//! - [`MySqlManager`]: `mysqldump` / `mysql`
//! - [`PostgresManager`]: `pg_dump` / `psql`

pub(crate) mod command;
pub mod mysql;
pub mod postgres;

pub use mysql::MySqlManager;
pub use postgres::PostgresManager;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::config::{DatabaseConfig, DatabaseEngine};
use crate::errors::Result;
use crate::staging::{StagedFile, StagingArea};

/// Options forwarded to the dump tool.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Lock tables while dumping. Only meaningful for engines that support it.
    pub lock_tables: bool,
    /// Gzip the dump while it is written to the staging area.
    pub compress: bool,
    /// Additional `--key=value` flags; an empty value renders as a bare `--key`.
    pub extra: BTreeMap<String, String>,
}

impl DumpOptions {
    /// File extension of the dumps produced with these options.
    pub fn extension(&self) -> &'static str {
        if self.compress { ".sql.gz" } else { ".sql" }
    }

    pub(crate) fn extra_args(&self) -> Vec<String> {
        self.extra
            .iter()
            .map(|(key, value)| {
                let key = key.trim_start_matches('-');
                if value.is_empty() {
                    format!("--{}", key)
                } else {
                    format!("--{}={}", key, value)
                }
            })
            .collect()
    }
}

#[async_trait]
pub trait DatabaseManager: Send + Sync {
    /// Short description of the target, free of credentials.
    fn describe(&self) -> String;

    /// Opens a connection and pings the server.
    async fn check_connection(&self) -> Result<()>;

    /// Writes a fresh dump into the staging area.
    ///
    /// Fails if the dump tool exits non-zero or produces no output; the staged file is
    /// removed in that case.
    async fn create_dump(&self, staging: &StagingArea) -> Result<StagedFile>;

    /// Feeds a dump back into the database. Files ending in `.gz` are decompressed on the fly.
    ///
    /// A restore that fails halfway leaves the database in whatever state the client tool
    /// reached; there is no rollback.
    async fn restore_dump(&self, path: &Path) -> Result<()>;
}

/// Builds the manager for the configured engine.
pub fn database_manager(config: DatabaseConfig, options: DumpOptions) -> Box<dyn DatabaseManager> {
    match config.engine {
        DatabaseEngine::MySql => Box::new(MySqlManager::new(config, options)),
        DatabaseEngine::Postgres => Box::new(PostgresManager::new(config, options)),
    }
}
