// dbbackup/src/backup/naming.rs
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

pub const BACKUP_PREFIX: &str = "backup_";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn backup_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^backup_(\d{8}_\d{6})\.sql(\.gz)?$").expect("backup name pattern is valid")
    })
}

/// `backup_<YYYYMMDD_HHMMSS>.sql`, or `.sql.gz` for compressed dumps.
///
/// The fixed-width timestamp makes lexical order equal chronological order.
pub fn backup_name(timestamp: DateTime<Utc>, compressed: bool) -> String {
    let extension = if compressed { ".sql.gz" } else { ".sql" };
    format!("{}{}{}", BACKUP_PREFIX, timestamp.format(TIMESTAMP_FORMAT), extension)
}

/// Extracts the embedded UTC timestamp. Names outside the convention yield `None`.
pub fn parse_backup_name(name: &str) -> Option<DateTime<Utc>> {
    let captures = backup_name_pattern().captures(name)?;
    NaiveDateTime::parse_from_str(&captures[1], TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Human readable size in binary units: `512 B`, `1.5 KiB`, `10.0 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
