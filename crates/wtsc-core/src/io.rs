use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::error::Result;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Readers never observe a half-written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// `<dir>/<UTC timestamp>.json`, millisecond resolution so runs sort by name.
pub fn result_file(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}.json", at.format("%Y%m%dT%H%M%S%.3fZ")))
}

/// Persist one recommendation result as pretty JSON. Returns the file written.
pub fn write_result(dir: &Path, at: DateTime<Utc>, value: &serde_json::Value) -> Result<PathBuf> {
    let path = result_file(dir, at);
    let data = serde_json::to_vec_pretty(value)?;
    atomic_write(&path, &data)?;
    Ok(path)
}
