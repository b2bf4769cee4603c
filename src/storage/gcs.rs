//! Google Cloud Storage backend.
//!
//! Credentials come from the environment (`GOOGLE_APPLICATION_CREDENTIALS`,
//! `GOOGLE_SERVICE_ACCOUNT`, ...) exactly as `object_store` resolves them.

use super::{join_key, ByteReader, ObjectStore, StoreError};
use crate::backup::filename::has_backup_suffix;
use async_trait::async_trait;
use futures::StreamExt;
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Object store backed by a GCS bucket, addressed as `gs://bucket[/prefix]`.
pub struct GcsStore {
    inner: Arc<dyn object_store::ObjectStore>,
    bucket: String,
    prefix: String,
}

impl GcsStore {
    /// Open a bucket from a `gs://` URL.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let (bucket, prefix) = parse_gcs_url(url)?;
        let inner = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&bucket)
            .build()
            .map_err(|e| StoreError::backend("open bucket", &bucket, e))?;

        Ok(Self::with_store(Arc::new(inner), bucket, prefix))
    }

    /// Wrap an existing `object_store` implementation.
    pub fn with_store(
        inner: Arc<dyn object_store::ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn location(&self, key: &str) -> Path {
        Path::from(join_key(&self.prefix, key))
    }
}

fn parse_gcs_url(url: &str) -> Result<(String, String), StoreError> {
    let rest = url
        .strip_prefix("gs://")
        .ok_or_else(|| StoreError::InvalidUrl(format!("expected gs:// scheme in {:?}", url)))?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));

    if bucket.is_empty() {
        return Err(StoreError::InvalidUrl(format!("{:?} has no bucket", url)));
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

fn map_error(operation: &'static str, key: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound(key.to_string()),
        other => StoreError::backend(operation, key, other),
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, reader: &mut ByteReader<'_>) -> Result<u64, StoreError> {
        let mut writer = BufWriter::new(Arc::clone(&self.inner), self.location(key));

        let copied = tokio::io::copy(reader, &mut writer).await;
        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    warn!(key, error = %abort_err, "Failed to abort GCS upload");
                }
                return Err(StoreError::backend("write", key, e));
            }
        };

        writer
            .shutdown()
            .await
            .map_err(|e| StoreError::backend("finish upload", key, e))?;

        Ok(written)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let prefix = (!self.prefix.is_empty()).then(|| Path::from(self.prefix.as_str()));
        let mut listing = self.inner.list(prefix.as_ref());

        let mut keys = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| StoreError::backend("list", &self.bucket, e))?;
            let Some(name) = meta.location.filename() else { continue };
            let expected = self.location(name);
            if meta.location == expected && has_backup_suffix(name) {
                keys.push(name.to_string());
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let location = self.location(key);
        // Some providers report success for missing objects
        self.inner
            .head(&location)
            .await
            .map_err(|e| map_error("delete", key, e))?;
        self.inner
            .delete(&location)
            .await
            .map_err(|e| map_error("delete", key, e))
    }

    fn close(&self) {}

    fn backend(&self) -> &'static str {
        "gcs"
    }
}
