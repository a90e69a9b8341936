//! In-process object store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    puts: u64,
}

/// Object store kept in memory. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned map is still consistent: every mutation is a single insert/remove.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of put operations, overwrites included.
    pub fn put_count(&self) -> u64 {
        self.lock().puts
    }

    /// Snapshot of every key.
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key));
        }
        let mut inner = self.lock();
        inner.objects.insert(key.to_string(), data);
        inner.puts += 1;
        Ok(())
    }

    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        self.put_bytes(key, data, content_type).await
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let inner = self.lock();
        Ok(inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.lock().objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.lock().objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overwrite_keeps_last_write() {
        let store = MemoryStore::new();
        store.put_bytes("k", vec![1], "x").await.unwrap();
        store.put_bytes("k", vec![2], "x").await.unwrap();
        assert_eq!(store.get_bytes("k").await.unwrap(), vec![2]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = MemoryStore::new();
        for key in ["a/1", "a/2", "ab/1", "b/1"] {
            store.put_bytes(key, vec![], "x").await.unwrap();
        }
        let keys: Vec<_> = store.list("a/").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put_bytes("k", vec![9], "x").await.unwrap();
        assert!(other.exists("k").await.unwrap());
    }
}
