//! Crash-safe JSON file writes.
//!
//! Files are written to a `.tmp` sibling, synced, then renamed over the
//! target while holding an exclusive advisory lock on a `.lock` sibling, so
//! readers never observe a half-written file and concurrent writers from
//! separate processes serialise.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PilotError, Result};

const TMP_SUFFIX: &str = ".tmp";
const LOCK_SUFFIX: &str = ".lock";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Path of the temporary file used while writing `path`.
#[must_use]
pub fn tmp_path(path: &Path) -> PathBuf {
    sibling(path, TMP_SUFFIX)
}

/// Serialise `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_file = File::create(sibling(path, LOCK_SUFFIX))?;
    FileExt::lock_exclusive(&lock_file).map_err(|e| {
        PilotError::config_with_path(format!("Failed to acquire lock: {e}"), path.to_path_buf())
    })?;

    let tmp = tmp_path(path);
    let json = serde_json::to_string_pretty(value)?;

    let mut tmp_file = File::create(&tmp)?;
    tmp_file.write_all(json.as_bytes())?;
    tmp_file.sync_all()?;

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and parse `path`.
///
/// Returns `Ok(None)` when the file does not exist. Parse failures are
/// returned as errors so callers decide whether to discard the file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let lock_path = sibling(path, LOCK_SUFFIX);
    let _guard = if lock_path.exists() {
        let lock_file = File::open(&lock_path)?;
        FileExt::lock_shared(&lock_file).map_err(|e| {
            PilotError::config_with_path(format!("Failed to acquire lock: {e}"), path.to_path_buf())
        })?;
        Some(lock_file)
    } else {
        None
    };

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(Some(serde_json::from_str(&contents)?))
}
