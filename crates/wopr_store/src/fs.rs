//! Atomic, owner-only file persistence.
//!
//! Write path: serialise to a temp file in the destination directory, fsync,
//! rename over the target. The temp file is created 0600, so private key
//! material is never readable by other users, not even transiently.

use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Corrupt(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    // NamedTempFile opens 0600 on Unix; persist() is a rename, so the mode
    // survives onto the destination.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Read a JSON file; a missing file yields the default (empty store), a
/// present-but-unparseable one is an error, never silently reset.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        write_json(&path, &vec![1u32, 2, 3]).unwrap();
        let back: Vec<u32> = read_json_or_default(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let back: Vec<u32> = read_json_or_default(&dir.path().join("nope.json")).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let res: Result<Vec<u32>, _> = read_json_or_default(&path);
        assert!(matches!(res, Err(StoreError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.json");
        write_json(&path, &"key material").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
