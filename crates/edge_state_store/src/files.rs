//! JSON file helpers shared by the stores.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Writes `value` as pretty JSON through a temp file in the same directory,
/// so readers never observe a partial file.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| StoreError::io("create", parent, err))?;

    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, json).map_err(|err| StoreError::io("write", &temp_path, err))?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io("rename", path, err));
    }
    Ok(())
}

/// Reads a JSON file; a missing file is `None`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io("read", path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::io("delete", path, err)),
    }
}

pub(crate) fn remove_dir(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::io("delete", path, err)),
    }
}

/// Pipeline ids become directory names.
pub(crate) fn check_id(pipeline_id: &str) -> Result<()> {
    let bad = pipeline_id.is_empty()
        || pipeline_id == "."
        || pipeline_id == ".."
        || pipeline_id.contains(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(StoreError::InvalidId(pipeline_id.to_string()));
    }
    Ok(())
}

/// One mutex per pipeline id, created on first use.
#[derive(Debug, Default)]
pub(crate) struct IdLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    pub(crate) fn with_lock<T>(&self, pipeline_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(pipeline_id.to_string()).or_default().clone()
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/value.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let value: Option<Vec<i32>> = read_json(&path).unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".tmp_"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.json");
        assert_eq!(read_json::<i32>(&path).unwrap(), None);

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_json::<i32>(&path), Err(StoreError::Parse { .. })));
        assert!(remove_file(&path).unwrap());
        assert!(!remove_file(&path).unwrap());
    }

    #[test]
    fn test_check_id() {
        assert!(check_id("pipeline-1").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(check_id(bad).is_err(), "{:?}", bad);
        }
    }
}
