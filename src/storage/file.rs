use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{KeyValueStorage, StorageError};

/// File-backed storage: one file per key under a base directory, written
/// atomically via a temp file and rename so a crash never leaves a
/// half-written snapshot behind.
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StorageError::Io(format!("failed to create storage directory: {}", e)))?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may contain characters that are not filename-safe (e.g. ':').
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.base_dir.join(name)
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("failed to read '{}': {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let map_err = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::StorageFull {
                StorageError::QuotaExceeded
            } else {
                StorageError::Io(format!("failed to write '{}': {}", key, e))
            }
        };
        let mut temp = NamedTempFile::new_in(&self.base_dir).map_err(map_err)?;
        temp.write_all(&value).map_err(map_err)?;
        temp.flush().map_err(map_err)?;
        temp.persist(self.path_for(key))
            .map_err(|e| StorageError::Io(format!("failed to persist '{}': {}", key, e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!(
                "failed to remove '{}': {}",
                key, e
            ))),
        }
    }
}
