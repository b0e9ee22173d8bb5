// dbbackup/src/database/command.rs
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::debug;
use which::which;

use crate::errors::{BackupError, Result};

/// Finds a client tool in the system PATH.
pub(crate) fn find_executable(name: &str) -> std::result::Result<PathBuf, String> {
    which(name).map_err(|_| {
        format!(
            "{} executable not found in PATH. Please ensure the database client tools are installed and in your PATH.",
            name
        )
    })
}

/// Runs a dump command and streams its stdout into `dest`, gzipping when `compress` is set.
///
/// Returns the number of uncompressed bytes the command produced.
pub(crate) fn run_dump(mut command: Command, database: &str, dest: &Path, compress: bool) -> Result<u64> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| BackupError::dump(database, format!("failed to start dump process: {}", e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackupError::dump(database, "dump process has no stdout"))?;
    let stderr = collect_stderr(child.stderr.take());

    let written = write_dump_output(stdout, dest, compress);
    if written.is_err() {
        // the child would block forever on a full pipe otherwise
        let _ = child.kill();
    }

    let status = child
        .wait()
        .map_err(|e| BackupError::dump(database, format!("failed to wait for dump process: {}", e)))?;
    let stderr = join_stderr(stderr);

    if !status.success() {
        return Err(BackupError::dump(
            database,
            format!("dump process exited with {}: {}", status, stderr.trim()),
        ));
    }

    let bytes = written.map_err(|e| {
        BackupError::dump(database, format!("failed to write dump to {}: {}", dest.display(), e))
    })?;
    if bytes == 0 {
        return Err(BackupError::dump(database, "dump process produced no output"));
    }

    debug!("Dump of {} produced {} bytes into {}", database, bytes, dest.display());
    Ok(bytes)
}

/// Runs a restore command with the contents of `source` on its stdin.
pub(crate) fn run_restore(mut command: Command, source: &Path) -> Result<()> {
    let file = File::open(source)
        .map_err(|e| BackupError::restore(source, format!("cannot open dump file: {}", e)))?;
    let mut reader: Box<dyn Read> = if is_gzip(source) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| BackupError::restore(source, format!("failed to start restore process: {}", e)))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| BackupError::restore(source, "restore process has no stdin"))?;
    let stderr = collect_stderr(child.stderr.take());

    let fed = io::copy(&mut reader, &mut stdin);
    // closing stdin signals end of input to the client
    drop(stdin);

    let status = child
        .wait()
        .map_err(|e| BackupError::restore(source, format!("failed to wait for restore process: {}", e)))?;
    let stderr = join_stderr(stderr);

    if !status.success() {
        return Err(BackupError::restore(
            source,
            format!("restore process exited with {}: {}", status, stderr.trim()),
        ));
    }
    fed.map_err(|e| BackupError::restore(source, format!("failed to stream dump into client: {}", e)))?;

    Ok(())
}

pub(crate) fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn write_dump_output(mut stdout: impl Read, dest: &Path, compress: bool) -> io::Result<u64> {
    let writer = BufWriter::new(File::create(dest)?);
    if compress {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        let bytes = io::copy(&mut stdout, &mut encoder)?;
        encoder.finish()?.flush()?;
        Ok(bytes)
    } else {
        let mut writer = writer;
        let bytes = io::copy(&mut stdout, &mut writer)?;
        writer.flush()?;
        Ok(bytes)
    }
}

fn collect_stderr(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_dump_writes_stdout_to_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dest = tmp.path().join("dump.sql");

        let bytes = run_dump(shell("printf 'CREATE TABLE t (id int);'"), "shop", &dest, false)?;

        assert_eq!(bytes, 24);
        assert_eq!(fs::read_to_string(&dest)?, "CREATE TABLE t (id int);");
        Ok(())
    }

    #[test]
    fn test_dump_non_zero_exit_is_a_dump_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dump.sql");

        let err = run_dump(shell("echo 'access denied' >&2; exit 2"), "shop", &dest, false).unwrap_err();

        match err {
            BackupError::Dump { database, reason } => {
                assert_eq!(database, "shop");
                assert!(reason.contains("access denied"));
            }
            other => panic!("expected dump failure, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_dump_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dump.sql");

        let err = run_dump(shell("true"), "shop", &dest, false).unwrap_err();

        assert!(matches!(err, BackupError::Dump { .. }));
        assert!(err.to_string().contains("no output"));
    }

    #[test]
    fn test_empty_dump_is_rejected_even_when_compressed() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("dump.sql.gz");

        let err = run_dump(shell("true"), "shop", &dest, true).unwrap_err();
        assert!(matches!(err, BackupError::Dump { .. }));
    }

    #[test]
    fn test_compressed_dump_restores_through_gunzip() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dump = tmp.path().join("dump.sql.gz");
        let restored = tmp.path().join("restored.sql");

        run_dump(shell("printf 'INSERT INTO t VALUES (1);'"), "shop", &dump, true)?;
        assert_ne!(fs::read(&dump)?, b"INSERT INTO t VALUES (1);");

        run_restore(shell(&format!("cat > '{}'", restored.display())), &dump)?;
        assert_eq!(fs::read_to_string(&restored)?, "INSERT INTO t VALUES (1);");
        Ok(())
    }

    #[test]
    fn test_restore_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let dump = tmp.path().join("dump.sql");
        fs::write(&dump, "DROP TABLE nope;").unwrap();

        let err = run_restore(shell("cat > /dev/null; echo 'ERROR 1051' >&2; exit 1"), &dump).unwrap_err();

        match err {
            BackupError::Restore { path, reason } => {
                assert_eq!(path, dump);
                assert!(reason.contains("ERROR 1051"));
            }
            other => panic!("expected restore failure, got {:?}", other),
        }
    }

    #[test]
    fn test_restore_of_missing_file_fails() {
        let err = run_restore(shell("cat > /dev/null"), Path::new("/nonexistent/dump.sql")).unwrap_err();
        assert!(matches!(err, BackupError::Restore { .. }));
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(Path::new("backup_20240101_020000.sql.gz")));
        assert!(!is_gzip(Path::new("backup_20240101_020000.sql")));
    }
}
