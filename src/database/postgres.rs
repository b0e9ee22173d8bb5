// dbbackup/src/database/postgres.rs
use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

use super::command::{find_executable, run_dump, run_restore};
use super::{DatabaseManager, DumpOptions};
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::staging::{StagedFile, StagingArea};

/// PostgreSQL through `pg_dump` (plain SQL format) and `psql`.
pub struct PostgresManager {
    config: DatabaseConfig,
    options: DumpOptions,
}

impl PostgresManager {
    pub fn new(config: DatabaseConfig, options: DumpOptions) -> Self {
        PostgresManager { config, options }
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            format!("--host={}", self.config.host),
            format!("--port={}", self.config.port),
            format!("--username={}", self.config.user),
            "--no-password".to_string(),
        ]
    }

    fn dump_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "--format=plain".to_string(),
            // drop objects before recreating them so the dump restores over an existing database
            "--clean".to_string(),
            "--if-exists".to_string(),
            "--no-owner".to_string(),
        ]);
        args.extend(self.options.extra_args());
        args.push(format!("--dbname={}", self.config.database));
        args
    }

    fn restore_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend([
            "-X".to_string(), // Do not read psqlrc
            "-q".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
        ]);
        args.push(format!("--dbname={}", self.config.database));
        args
    }

    fn command(&self, program: &Path, args: Vec<String>) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        if !self.config.password.is_empty() {
            command.env("PGPASSWORD", self.config.password.expose());
        }
        command
    }
}

#[async_trait]
impl DatabaseManager for PostgresManager {
    fn describe(&self) -> String {
        self.config.display_target()
    }

    async fn check_connection(&self) -> Result<()> {
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(self.config.password.expose())
            .database(&self.config.database);

        let mut conn: PgConnection = options
            .connect()
            .await
            .map_err(|e| BackupError::connection(self.describe(), e))?;
        conn.ping()
            .await
            .map_err(|e| BackupError::connection(self.describe(), e))?;
        let _ = conn.close().await;

        info!("Connected to PostgreSQL database {}", self.describe());
        Ok(())
    }

    async fn create_dump(&self, staging: &StagingArea) -> Result<StagedFile> {
        let database = &self.config.database;
        let pg_dump = find_executable("pg_dump").map_err(|e| BackupError::dump(database, e))?;
        if self.options.lock_tables {
            debug!("pg_dump always takes a consistent snapshot; lock_tables has no effect");
        }
        let staged = staging.reserve(database, self.options.extension())?;

        info!("Starting pg_dump of {}", self.describe());
        let args = self.dump_args();
        debug!("Running {} {}", pg_dump.display(), args.join(" "));

        let bytes = run_dump(
            self.command(&pg_dump, args),
            database,
            staged.path(),
            self.options.compress,
        )?;

        info!("✓ Dumped {} ({} bytes) to {}", database, bytes, staged.path().display());
        Ok(staged)
    }

    async fn restore_dump(&self, path: &Path) -> Result<()> {
        let psql = find_executable("psql").map_err(|e| BackupError::restore(path, e))?;

        info!("Restoring {} into {} (using psql)", path.display(), self.describe());
        let args = self.restore_args();
        debug!("Running {} {}", psql.display(), args.join(" "));

        run_restore(self.command(&psql, args), path)?;

        info!("✓ Restored {} into {}", path.display(), self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseEngine, Secret};

    fn manager() -> PostgresManager {
        PostgresManager::new(
            DatabaseConfig {
                engine: DatabaseEngine::Postgres,
                host: "pg.local".to_string(),
                port: 5432,
                user: "app".to_string(),
                password: Secret::new("s3cr3t"),
                database: "orders".to_string(),
            },
            DumpOptions::default(),
        )
    }

    #[test]
    fn test_dump_args() {
        let args = manager().dump_args();

        assert!(args.contains(&"--host=pg.local".to_string()));
        assert!(args.contains(&"--username=app".to_string()));
        assert!(args.contains(&"--no-password".to_string()));
        assert!(args.contains(&"--clean".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--dbname=orders"));
        assert!(args.iter().all(|a| !a.contains("s3cr3t")));
    }

    #[test]
    fn test_restore_stops_on_first_error() {
        let args = manager().restore_args();

        let pos = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[pos + 1], "ON_ERROR_STOP=1");
        assert!(args.contains(&"--dbname=orders".to_string()));
    }

    #[test]
    fn test_password_passed_through_environment() {
        let m = manager();
        let command = m.command(Path::new("psql"), m.restore_args());
        let pgpassword = command
            .get_envs()
            .find(|(k, _)| k.to_str() == Some("PGPASSWORD"))
            .and_then(|(_, v)| v);

        assert_eq!(pgpassword, Some(std::ffi::OsStr::new("s3cr3t")));
    }
}
