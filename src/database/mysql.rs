// dbbackup/src/database/mysql.rs
use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};

use super::command::{find_executable, run_dump, run_restore};
use super::{DatabaseManager, DumpOptions};
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::staging::{StagedFile, StagingArea};

/// MySQL / MariaDB through `mysqldump` and the `mysql` client.
///
/// The password travels in `MYSQL_PWD` so it never appears in the process list.
pub struct MySqlManager {
    config: DatabaseConfig,
    options: DumpOptions,
}

impl MySqlManager {
    pub fn new(config: DatabaseConfig, options: DumpOptions) -> Self {
        MySqlManager { config, options }
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            format!("--host={}", self.config.host),
            format!("--port={}", self.config.port),
            format!("--user={}", self.config.user),
            "--protocol=TCP".to_string(),
        ]
    }

    fn dump_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        // consistent snapshot for InnoDB without blocking writers
        args.push("--single-transaction".to_string());
        if self.options.lock_tables {
            args.push("--lock-tables".to_string());
        } else {
            args.push("--skip-lock-tables".to_string());
        }
        args.extend(self.options.extra_args());
        args.push(self.config.database.clone());
        args
    }

    fn restore_args(&self) -> Vec<String> {
        let mut args = self.connection_args();
        args.push(self.config.database.clone());
        args
    }

    fn command(&self, program: &Path, args: Vec<String>) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        if !self.config.password.is_empty() {
            command.env("MYSQL_PWD", self.config.password.expose());
        }
        command
    }
}

#[async_trait]
impl DatabaseManager for MySqlManager {
    fn describe(&self) -> String {
        self.config.display_target()
    }

    async fn check_connection(&self) -> Result<()> {
        let options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(self.config.password.expose())
            .database(&self.config.database);

        let mut conn: MySqlConnection = options
            .connect()
            .await
            .map_err(|e| BackupError::connection(self.describe(), e))?;
        conn.ping()
            .await
            .map_err(|e| BackupError::connection(self.describe(), e))?;
        let _ = conn.close().await;

        info!("Connected to MySQL database {}", self.describe());
        Ok(())
    }

    async fn create_dump(&self, staging: &StagingArea) -> Result<StagedFile> {
        let database = &self.config.database;
        let mysqldump = find_executable("mysqldump").map_err(|e| BackupError::dump(database, e))?;
        let staged = staging.reserve(database, self.options.extension())?;

        info!("Starting mysqldump of {}", self.describe());
        let args = self.dump_args();
        debug!("Running {} {}", mysqldump.display(), args.join(" "));

        let bytes = run_dump(
            self.command(&mysqldump, args),
            database,
            staged.path(),
            self.options.compress,
        )?;

        info!("✓ Dumped {} ({} bytes) to {}", database, bytes, staged.path().display());
        Ok(staged)
    }

    async fn restore_dump(&self, path: &Path) -> Result<()> {
        let mysql = find_executable("mysql").map_err(|e| BackupError::restore(path, e))?;

        info!("Restoring {} into {}", path.display(), self.describe());
        let args = self.restore_args();
        debug!("Running {} {}", mysql.display(), args.join(" "));

        run_restore(self.command(&mysql, args), path)?;

        info!("✓ Restored {} into {}", path.display(), self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseEngine, Secret};

    fn manager(options: DumpOptions) -> MySqlManager {
        MySqlManager::new(
            DatabaseConfig {
                engine: DatabaseEngine::MySql,
                host: "db.local".to_string(),
                port: 3307,
                user: "backup".to_string(),
                password: Secret::new("pw"),
                database: "shop".to_string(),
            },
            options,
        )
    }

    #[test]
    fn test_dump_args_skip_locks_by_default() {
        let args = manager(DumpOptions::default()).dump_args();

        assert!(args.contains(&"--host=db.local".to_string()));
        assert!(args.contains(&"--port=3307".to_string()));
        assert!(args.contains(&"--single-transaction".to_string()));
        assert!(args.contains(&"--skip-lock-tables".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("shop"));
    }

    #[test]
    fn test_dump_args_lock_tables_and_extras() {
        let mut options = DumpOptions {
            lock_tables: true,
            ..DumpOptions::default()
        };
        options.extra.insert("routines".to_string(), String::new());
        let args = manager(options).dump_args();

        assert!(args.contains(&"--lock-tables".to_string()));
        assert!(!args.contains(&"--skip-lock-tables".to_string()));
        assert!(args.contains(&"--routines".to_string()));
    }

    #[test]
    fn test_password_never_in_arguments() {
        let m = manager(DumpOptions::default());
        assert!(m.dump_args().iter().all(|a| !a.contains("pw")));
        assert!(m.restore_args().iter().all(|a| !a.starts_with("--password")));

        let command = m.command(Path::new("mysqldump"), m.dump_args());
        let pwd = command
            .get_envs()
            .find(|(k, _)| k.to_str() == Some("MYSQL_PWD"))
            .and_then(|(_, v)| v);
        assert_eq!(pwd, Some(std::ffi::OsStr::new("pw")));
    }
}
