// Local filesystem backend - keys map directly to files in one directory

use super::{ByteReader, ObjectStore, StoreError};
use crate::backup::filename::has_backup_suffix;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const PARTIAL_SUFFIX: &str = ".partial";

/// Store rooted at a local directory, addressed as `file://path`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store for a `file://` URL, creating the directory if needed.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| StoreError::InvalidUrl(format!("expected file:// scheme in {:?}", url)))?;
        if path.is_empty() {
            return Err(StoreError::InvalidUrl(format!("{:?} has no path", url)));
        }
        Self::with_root(path).await
    }

    /// Open the store rooted at `root`, creating the directory if needed.
    pub async fn with_root(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { root: root.into() };
        store.ensure_directory_exists().await?;
        debug!(root = %store.root.display(), "Opened filesystem store");
        Ok(store)
    }

    /// Directory holding the objects
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_directory_exists(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::backend("create directory", self.root.display().to_string(), e))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.root.join(format!(".{}{}", key, PARTIAL_SUFFIX))
    }
}

/// Removes an uncommitted partial file, including when the write future is dropped.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn put(&self, key: &str, reader: &mut ByteReader<'_>) -> Result<u64, StoreError> {
        let final_path = self.object_path(key);
        let mut partial = PartialFile {
            path: self.partial_path(key),
            committed: false,
        };

        let mut file = fs::File::create(&partial.path)
            .await
            .map_err(|e| StoreError::backend("create", key, e))?;

        let written = tokio::io::copy(reader, &mut file)
            .await
            .map_err(|e| StoreError::backend("write", key, e))?;

        file.flush()
            .await
            .map_err(|e| StoreError::backend("flush", key, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::backend("sync", key, e))?;
        drop(file);

        fs::rename(&partial.path, &final_path)
            .await
            .map_err(|e| StoreError::backend("rename", key, e))?;
        partial.committed = true;

        Ok(written)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::backend("list", root.clone(), e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::backend("list", root.clone(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::backend("stat", entry.path().display().to_string(), e))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if has_backup_suffix(name) {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::backend("delete", key, e)),
        }
    }

    fn close(&self) {}

    fn backend(&self) -> &'static str {
        "file"
    }
}
