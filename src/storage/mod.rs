//! Durable key-value storage collaborator for persisting the data store
//! snapshot between sessions.

use async_trait::async_trait;
use thiserror::Error;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend ran out of space. The data store downgrades this to a
    /// degraded-persistence status flag; a full in-memory session must keep
    /// working without durable storage.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Storage I/O error: {0}")]
    Io(String),
}

/// Minimal durable key-value contract. Values are opaque byte blobs; the
/// data store owns the serialization format.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
