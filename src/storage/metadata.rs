//! Stat-level metadata extraction and path normalization.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::models::FileMeta;
use crate::error::StorageError;
use crate::Result;

/// Normalize a path lexically: absolute, no `.` or `..` components,
/// platform separators. Case is preserved.
///
/// The path does not need to exist, so deleted paths normalize the same
/// way they did when they were indexed.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The unique key stored in the `path` column.
#[must_use]
pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

/// Derive `(name, case_key, ext)` from a path alone, without touching disk.
#[must_use]
pub fn name_parts(path: &Path, is_directory: bool) -> (String, String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let case_key = name.to_lowercase();
    let ext = if is_directory {
        String::new()
    } else {
        path.extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    };
    (name, case_key, ext)
}

/// Capture metadata for a path that existed when it was detected.
///
/// # Errors
///
/// Returns `StorageError::NotFound` if the path vanished before it could be
/// read (a benign race callers skip), or an I/O error for other failures.
pub fn extract_metadata(path: &Path) -> Result<FileMeta> {
    let normalized = normalize_path(path);
    let meta = std::fs::metadata(&normalized).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            crate::Error::from(StorageError::not_found(
                "path",
                normalized.to_string_lossy(),
            ))
        } else {
            crate::Error::from(e)
        }
    })?;

    let is_directory = meta.is_dir();
    let (name, case_key, ext) = name_parts(&normalized, is_directory);
    let size = if is_directory {
        0
    } else {
        i64::try_from(meta.len()).unwrap_or(i64::MAX)
    };

    Ok(FileMeta {
        path: normalized.to_string_lossy().into_owned(),
        name,
        case_key,
        ext,
        size,
        mtime: meta.modified().map(epoch_secs).unwrap_or(0),
        ctime: created_secs(&meta),
        is_directory,
    })
}

fn epoch_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

#[cfg(unix)]
fn created_secs(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ctime()
}

#[cfg(not(unix))]
fn created_secs(meta: &std::fs::Metadata) -> i64 {
    meta.created().map(epoch_secs).unwrap_or(0)
}
