//! Atomic file writes and lock-protected JSON read-modify-write.
//!
//! Every write goes to a process-unique temporary sibling first and is then
//! renamed over the target, so readers (and crashes) only ever observe the
//! old or the new content.

use crate::lock::{self, LockOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize data for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot lock {path}: {message}")]
    Lock { path: PathBuf, message: String },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read a JSON file, returning `T::default()` if it is missing or empty.
///
/// A file that exists but does not parse is an error, never a default.
pub fn read<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }

    let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Temporary sibling used while writing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Write raw bytes to `path` atomically, creating parent directories.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp = temp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(data).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes_atomic(path, json.as_bytes())
}

/// Read-modify-write under the exclusive lock at `lock_path`.
///
/// Returns the value that was written.
pub fn update<T, F>(
    data_path: &Path,
    lock_path: &Path,
    options: LockOptions,
    f: F,
) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default + Serialize,
    F: FnOnce(&mut T),
{
    let _lock = lock::acquire(lock_path, options).map_err(|e| StoreError::Lock {
        path: lock_path.to_path_buf(),
        message: format!("{e:#}"),
    })?;

    let mut data: T = read(data_path)?;
    f(&mut data);
    write_atomic(data_path, &data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Marks {
        items: BTreeMap<String, u32>,
    }

    #[test]
    fn test_read_missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let marks: Marks = read(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(marks, Marks::default());
    }

    #[test]
    fn test_read_empty_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.json");
        fs::write(&path, "  \n").unwrap();
        let marks: Marks = read(&path).unwrap();
        assert_eq!(marks, Marks::default());
    }

    #[test]
    fn test_read_garbage_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let result: Result<Marks, _> = read(&path);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("marks.json");

        let mut marks = Marks::default();
        marks.items.insert("a".into(), 1);
        write_atomic(&path, &marks).unwrap();

        let loaded: Marks = read(&path).unwrap();
        assert_eq!(loaded, marks);
        assert!(!temp_path(&path).exists());
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_bytes_atomic_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.png");
        write_bytes_atomic(&path, b"first").unwrap();
        write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_update_merges_under_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let data_path = tmp.path().join("marks.json");
        let lock_path = tmp.path().join("marks.json.lock");

        update::<Marks, _>(&data_path, &lock_path, LockOptions::default(), |m| {
            m.items.insert("first".into(), 1);
        })
        .unwrap();
        let written = update::<Marks, _>(&data_path, &lock_path, LockOptions::default(), |m| {
            m.items.insert("second".into(), 2);
        })
        .unwrap();

        assert_eq!(written.items.len(), 2);
        let on_disk: Marks = read(&data_path).unwrap();
        assert_eq!(on_disk, written);
        assert!(!lock_path.exists());
    }
}
