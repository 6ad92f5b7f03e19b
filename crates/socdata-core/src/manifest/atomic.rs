//! Atomic JSON persistence for manifests.
//!
//! Writers never touch the target path directly: bytes go to a uniquely
//! named temp file in the same directory, get validated by re-parsing and
//! synced, and only then rename over the target. Readers therefore see
//! either the old manifest or the new one, never a torn file.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SocDataError};

/// Read and parse a JSON file.
///
/// Missing file is `None`; a file that exists but does not parse is an
/// error, so callers can tell "never written" from "corrupt".
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut contents = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut contents))
        .map_err(|e| SocDataError::io_with_path(e, path))?;

    let data: T = serde_json::from_str(&contents).map_err(|e| SocDataError::Json {
        message: format!("{} did not parse: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Write `data` as pretty-printed JSON, atomically.
///
/// With `keep_backup`, the previous file (if any) is copied to `.json.bak`
/// before the rename; backup failure is logged, not fatal.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SocDataError::io_with_path(e, parent))?;
    }

    let serialized = serde_json::to_string_pretty(data).map_err(|e| SocDataError::Json {
        message: format!("serialization failed: {}", e),
        source: Some(e),
    })?;
    // Round-trip before committing: a manifest that cannot be re-read must
    // never become the live file.
    serde_json::from_str::<serde_json::Value>(&serialized).map_err(|e| SocDataError::Json {
        message: format!("validation re-parse failed: {}", e),
        source: Some(e),
    })?;

    let temp_path = staging_path(path, "json");
    write_synced(&temp_path, serialized.as_bytes())?;

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        match fs::copy(path, &backup_path) {
            Ok(_) => debug!("kept backup at {}", backup_path.display()),
            Err(e) => warn!("backup copy to {} failed: {}", backup_path.display(), e),
        }
    }

    fs::rename(&temp_path, path).map_err(|e| SocDataError::io_with_path(e, path))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Temp-file sibling of `path`, unique per process and thread.
///
/// Concurrent writers of the same target collide on the rename (last one
/// wins), never on the staging file.
pub(crate) fn staging_path(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(format!(
        "{}.{}.{}.tmp",
        extension,
        process::id(),
        thread_token()
    ))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |e: std::io::Error| SocDataError::io_with_path(e, path);
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn thread_token() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}
