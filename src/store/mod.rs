// Whitelist store
// Owns the registry, persists it as a JSON document and autosaves it in the background

pub mod autosave;
pub mod document;
pub mod manager;
pub mod storage;

pub use autosave::{AutosaveConfig, AutosaveHandle, AutosaveOutcome, Autosaver, spawn_autosave};
pub use document::{AccountRecord, Fingerprint, WhitelistDocument};
pub use manager::WhitelistStore;
pub use storage::{
    DocumentStorage, FileDocumentStorage, MemoryDocumentStorage, StorageConfig,
    create_storage_backend,
};

use crate::whitelist::WhitelistError;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the durable medium failed
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    /// The stored document could not be parsed
    #[error("corrupt whitelist document: {0}")]
    CorruptDocument(String),
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::PersistenceFailure(err.to_string())
    }
}
