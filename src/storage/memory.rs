use super::{ByteReader, ObjectStore, StoreError};
use crate::backup::filename::has_backup_suffix;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// In-memory object store.
///
/// Clones share the same contents, so a test can keep one clone for
/// inspection while the pipeline owns another. Individual keys can be set up
/// to fail deletion.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
    failing_deletes: Arc<DashSet<String>>,
    delete_attempts: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing `put`
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.insert(key.into(), data.into());
    }

    /// Make every `delete` of `key` fail
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.failing_deletes.insert(key.into());
    }

    /// Contents of an object
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Whether an object exists
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Every key, including ones without the backup suffix, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of `delete` calls seen, successful or not
    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    /// Number of `close` calls seen
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, reader: &mut ByteReader<'_>) -> Result<u64, StoreError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StoreError::backend("write", key, e))?;

        let written = data.len() as u64;
        self.objects.insert(key.to_string(), data);
        Ok(written)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| has_backup_suffix(key))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);

        if self.failing_deletes.contains(key) {
            return Err(StoreError::backend("delete", key, "injected failure"));
        }

        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_list_delete() {
        let store = MemoryStore::new();
        let mut data: &[u8] = b"payload";

        let written = store.put("a.unf", &mut data).await.unwrap();
        assert_eq!(written, 7);
        assert_eq!(store.list().await.unwrap(), vec!["a.unf".to_string()]);

        store.delete("a.unf").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_excludes_foreign_objects() {
        let store = MemoryStore::new();
        store.insert("notes.txt", "x");
        store.insert("b.unf", "y");

        assert_eq!(store.list().await.unwrap(), vec!["b.unf".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete("missing.unf").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
