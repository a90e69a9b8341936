//! The object store abstraction shared by every pipeline stage.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Information about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

/// Key/value object store with prefix listing.
///
/// Writes to an existing key overwrite it (last writer wins).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload bytes.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Upload a local file.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Download an object as bytes.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Download an object to a local file, creating parent directories.
    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let bytes = self.get_bytes(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::download_failed(format!("Failed to create directory: {}", e))
            })?;
        }

        tokio::fs::write(path, bytes).await.map_err(|e| {
            StorageError::download_failed(format!("Failed to write file: {}", e))
        })?;

        Ok(())
    }

    /// Delete multiple objects.
    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(keys.len() as u32)
    }
}
