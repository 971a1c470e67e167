use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Returned when a slot other than the currently open one is committed.
    /// This is a programmer error, not a recoverable race.
    #[error("No or wrong update slot to be committed")]
    SlotMismatch,

    /// A generic relation resolved to a view model of an unexpected
    /// collection. Indicates an impossible server payload.
    #[error("Generic relation '{own_key}' resolved to '{element_id}', which is none of the expected collections")]
    InvalidGenericTarget { own_key: String, element_id: String },

    #[error("Operation not supported for collection '{0}'")]
    Unsupported(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
