//! On-disk blob store for uploaded documents.
//!
//! Blobs live flat under one directory as `<uuid>.<ext>`. Writes go through a
//! temp file in the same directory and are renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored name: {0}")]
    InvalidName(String),
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` under a fresh name derived from `id` and the original
    /// filename's extension. Returns the stored name.
    pub fn save(&self, id: &Uuid, original_filename: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".into());
        let stored_name = format!("{id}.{extension}");

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(&stored_name))
            .map_err(|e| StorageError::Io(e.error))?;

        tracing::debug!(stored_name = %stored_name, size = bytes.len(), "File stored");
        Ok(stored_name)
    }

    pub fn read(&self, stored_name: &str) -> Result<Vec<u8>, StorageError> {
        Ok(std::fs::read(self.path_of(stored_name)?)?)
    }

    /// Remove a blob. A blob that is already gone is not an error.
    pub fn remove(&self, stored_name: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_of(stored_name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of several blobs; failures are logged.
    pub fn remove_all(&self, stored_names: &[String]) {
        for name in stored_names {
            if let Err(e) = self.remove(name) {
                tracing::warn!(stored_name = %name, error = %e, "Failed to remove stored file");
            }
        }
    }

    fn path_of(&self, stored_name: &str) -> Result<PathBuf, StorageError> {
        let valid = !stored_name.is_empty()
            && !stored_name.starts_with('.')
            && stored_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(StorageError::InvalidName(stored_name.to_string()));
        }
        Ok(self.root.join(stored_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("files")).unwrap();
        let id = Uuid::new_v4();

        let name = store.save(&id, "Lab Report.PDF", b"%PDF-1.4").unwrap();
        assert_eq!(name, format!("{id}.pdf"));
        assert_eq!(store.read(&name).unwrap(), b"%PDF-1.4");

        store.remove(&name).unwrap();
        assert!(store.read(&name).is_err());
        // Removing twice is fine
        store.remove(&name).unwrap();
    }

    #[test]
    fn odd_extensions_fall_back_to_bin() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        assert_eq!(store.save(&id, "noext", b"x").unwrap(), format!("{id}.bin"));
        let id = Uuid::new_v4();
        assert_eq!(store.save(&id, "weird.t$t", b"x").unwrap(), format!("{id}.bin"));
    }

    #[test]
    fn traversal_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.read("../etc/passwd"),
            Err(StorageError::InvalidName(_))
        ));
        assert!(store.read("..").is_err());
    }
}
