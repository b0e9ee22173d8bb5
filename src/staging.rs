//! Local working directory for dump files on their way to or from storage.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use log::{debug, info, warn};
use regex::Regex;
use tempfile::TempPath;

use crate::backup::naming::parse_backup_name;
use crate::errors::Result;

const RAND_LEN: usize = 8;

/// Names produced by [`StagingArea::reserve`]: `<label>_<pid>_<YYYYmmddHHMMSS>_<random><ext>`.
fn staged_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^.+_\d+_\d{14}_[A-Za-z0-9]{8}\.sql(\.gz)?$").expect("staged name pattern is valid")
    })
}

/// Whether `name` is a file this tool puts into the staging directory.
fn is_owned_file(name: &str) -> bool {
    staged_name_pattern().is_match(name) || parse_backup_name(name).is_some()
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Opens the staging area, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Staging area ready at {}", dir.display());
        Ok(StagingArea { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserves a fresh, empty file in the staging area.
    ///
    /// The name combines `label`, the process id, a timestamp and a random token so that
    /// accidentally overlapping runs never share a file. The file is deleted when the
    /// returned [`StagedFile`] is dropped unless it is persisted first.
    pub fn reserve(&self, label: &str, extension: &str) -> Result<StagedFile> {
        let prefix = format!(
            "{}_{}_{}_",
            label,
            std::process::id(),
            Utc::now().format("%Y%m%d%H%M%S")
        );
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(extension)
            .rand_bytes(RAND_LEN)
            .tempfile_in(&self.dir)?;
        let path = file.into_temp_path();
        debug!("Reserved staging file {}", path.display());
        Ok(StagedFile { path })
    }

    /// Removes the dumps this tool left in the staging directory: staged files and kept
    /// backup copies. Anything else in the directory is left alone.
    pub fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let owned = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_owned_file);
            if !owned {
                debug!("Leaving foreign file {} in place", path.display());
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove staged file {}: {}", path.display(), e),
            }
        }
        info!("Purged {} files from staging area {}", removed, self.dir.display());
        Ok(removed)
    }
}

/// A file inside the staging area that is removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Keeps the file under `dest` instead of deleting it.
    pub fn persist(self, dest: &Path) -> Result<PathBuf> {
        self.path.persist(dest).map_err(|e| e.error)?;
        Ok(dest.to_path_buf())
    }

    /// Deletes the file now, reporting any I/O error instead of swallowing it on drop.
    pub fn discard(self) -> Result<()> {
        let display = self.path.display().to_string();
        self.path.close()?;
        debug!("Removed staging file {}", display);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_creates_unique_files() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let staging = StagingArea::new(tmp.path().join("nested/staging"))?;

        let a = staging.reserve("dump", ".sql")?;
        let b = staging.reserve("dump", ".sql")?;

        assert_ne!(a.path(), b.path());
        assert!(a.path().exists());
        assert!(a.path().starts_with(staging.dir()));
        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("dump_{}_", std::process::id())));
        assert!(name.ends_with(".sql"));
        assert_eq!(a.size()?, 0);
        Ok(())
    }

    #[test]
    fn test_drop_removes_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let staging = StagingArea::new(tmp.path())?;

        let staged = staging.reserve("dump", ".sql")?;
        let path = staged.path().to_path_buf();
        fs::write(&path, b"SELECT 1;")?;
        drop(staged);

        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_persist_and_discard() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let staging = StagingArea::new(tmp.path())?;

        let kept = staging.reserve("dump", ".sql")?;
        fs::write(kept.path(), b"data")?;
        let dest = tmp.path().join("backup_20240101_020000.sql");
        kept.persist(&dest)?;
        assert_eq!(fs::read(&dest)?, b"data");

        let gone = staging.reserve("dump", ".sql")?;
        let path = gone.path().to_path_buf();
        gone.discard()?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_purge_only_removes_own_files() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let staging = StagingArea::new(tmp.path())?;

        let leftover = staging.reserve("shop", ".sql.gz")?;
        let leftover_path = leftover.path().to_path_buf();
        leftover.persist(&leftover_path)?;
        fs::write(tmp.path().join("backup_20240101_020000.sql"), b"x")?;
        fs::write(tmp.path().join("notes.txt"), b"keep")?;
        fs::write(tmp.path().join("report.sql"), b"keep")?;
        fs::create_dir(tmp.path().join("backup_20240101_030000.sql"))?;

        assert_eq!(staging.purge()?, 2);
        assert!(!leftover_path.exists());
        assert!(tmp.path().join("notes.txt").exists());
        assert!(tmp.path().join("report.sql").exists());
        assert!(tmp.path().join("backup_20240101_030000.sql").is_dir());
        Ok(())
    }

    #[test]
    fn test_owned_file_names() {
        assert!(is_owned_file("shop_4242_20240101020000_a1B2c3D4.sql"));
        assert!(is_owned_file("restore_1_20240101020000_zzzzzzzz.sql.gz"));
        assert!(is_owned_file("backup_20240101_020000.sql.gz"));
        assert!(!is_owned_file("shop.sql"));
        assert!(!is_owned_file("shop_4242_20240101020000_a1B2c3D4.txt"));
    }
}
