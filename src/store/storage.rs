// Durable media for the whitelist document

use super::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for whitelist document storage backends
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Read the whole document. `None` means the medium does not exist yet.
    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the whole document
    async fn write(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Move an unreadable document out of the way before it is replaced.
    /// Returns where the copy went, or `None` if the medium keeps no copies.
    async fn preserve_unreadable(&self) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// JSON file on local disk
    File {
        #[serde(default = "default_store_path")]
        path: PathBuf,
    },
    /// Process memory only; nothing survives a restart
    Memory,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("store.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_store_path(),
        }
    }
}

/// Factory function to create storage backend based on configuration
pub fn create_storage_backend(config: &StorageConfig) -> Arc<dyn DocumentStorage> {
    match config {
        StorageConfig::File { path } => Arc::new(FileDocumentStorage::new(path)),
        StorageConfig::Memory => Arc::new(MemoryDocumentStorage::new()),
    }
}

/// JSON file storage
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so readers never observe a half-written document.
pub struct FileDocumentStorage {
    path: PathBuf,
}

impl FileDocumentStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn unreadable_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl DocumentStorage for FileDocumentStorage {
    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::PersistenceFailure(format!(
                "Failed to read '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
        }

        // Atomic rename
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    async fn preserve_unreadable(&self) -> Result<Option<String>, StoreError> {
        let backup = self.unreadable_path();
        match tokio::fs::rename(&self.path, &backup).await {
            Ok(()) => Ok(Some(backup.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory document storage
/// Suitable for development and testing
pub struct MemoryDocumentStorage {
    contents: RwLock<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryDocumentStorage {
    pub fn new() -> Self {
        Self {
            contents: RwLock::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    /// Start from existing document bytes
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: RwLock::new(Some(bytes.into())),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn contents(&self) -> Option<Vec<u8>> {
        self.contents.read().await.clone()
    }
}

impl Default for MemoryDocumentStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.contents.read().await.clone())
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut contents = self.contents.write().await;
        *contents = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_storage_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDocumentStorage::new(dir.path().join("store.json"));

        assert!(storage.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let storage = FileDocumentStorage::new(&path);

        storage.write(b"a much longer first document").await.unwrap();
        storage.write(b"short").await.unwrap();

        assert_eq!(storage.read().await.unwrap().unwrap(), b"short");
        assert!(!storage.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_storage_preserves_unreadable_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"not json").unwrap();
        let storage = FileDocumentStorage::new(&path);

        let backup = storage.preserve_unreadable().await.unwrap().unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read(&backup).unwrap(), b"not json");
        assert!(storage.preserve_unreadable().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_counts_writes() {
        let storage = MemoryDocumentStorage::new();
        assert!(storage.read().await.unwrap().is_none());

        storage.write(b"one").await.unwrap();
        storage.write(b"two").await.unwrap();

        assert_eq!(storage.write_count(), 2);
        assert_eq!(storage.contents().await.unwrap(), b"two");
    }

    #[test]
    fn test_storage_config_parsing() {
        let file: StorageConfig = serde_yaml::from_str("type: file\npath: data/wl.json").unwrap();
        assert_eq!(
            file,
            StorageConfig::File {
                path: PathBuf::from("data/wl.json")
            }
        );

        let defaulted: StorageConfig = serde_yaml::from_str("type: file").unwrap();
        assert_eq!(defaulted, StorageConfig::default());

        let memory: StorageConfig = serde_yaml::from_str("type: memory").unwrap();
        assert_eq!(memory, StorageConfig::Memory);
    }
}
