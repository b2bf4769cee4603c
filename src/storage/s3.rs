// S3 Backend Implementation
// Streams backups into a bucket, switching to multipart upload for large inputs

use super::{join_key, ByteReader, ObjectStore, StoreError};
use crate::backup::filename::has_backup_suffix;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use url::Url;

/// Smallest part size S3 accepts for every part but the last
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 store configuration
#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: Option<String>,
    pub key_prefix: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub part_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            region: None,
            key_prefix: String::new(),
            endpoint_url: None,
            force_path_style: false,
            part_size: 8 * 1024 * 1024,
        }
    }
}

impl S3Config {
    /// Parse `s3://bucket[/prefix][?region=..&endpoint=..&force_path_style=true]`.
    pub fn from_url(raw: &str) -> Result<Self, StoreError> {
        let url = Url::parse(raw).map_err(|e| StoreError::InvalidUrl(format!("{:?}: {}", raw, e)))?;
        if url.scheme() != "s3" {
            return Err(StoreError::InvalidUrl(format!(
                "expected s3:// scheme, got {}://",
                url.scheme()
            )));
        }

        let bucket_name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::InvalidUrl(format!("{:?} has no bucket", raw)))?
            .to_string();

        let mut config = Self {
            bucket_name,
            key_prefix: url.path().trim_matches('/').to_string(),
            ..Self::default()
        };

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "region" => config.region = Some(value.into_owned()),
                "endpoint" => config.endpoint_url = Some(value.into_owned()),
                "force_path_style" | "use_path_style" => {
                    config.force_path_style = matches!(value.as_ref(), "true" | "1")
                }
                other => debug!(parameter = other, "Ignoring unknown s3 URL parameter"),
            }
        }

        Ok(config)
    }
}

/// Object store backed by an S3 bucket.
pub struct S3Store {
    client: Client,
    config: S3Config,
}

impl S3Store {
    /// Build a client from the ambient AWS configuration plus `config` overrides.
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        // Support for LocalStack/MinIO with custom endpoint
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            config,
        }
    }

    fn object_key(&self, key: &str) -> String {
        join_key(&self.config.key_prefix, key)
    }

    fn part_size(&self) -> usize {
        self.config.part_size.max(MIN_PART_SIZE)
    }

    async fn put_single(&self, object_key: &str, body: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(object_key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StoreError::backend("write", object_key, e.into_service_error()))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        object_key: &str,
        first: Bytes,
        reader: &mut ByteReader<'_>,
    ) -> Result<u64, StoreError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket_name)
            .key(object_key)
            .send()
            .await
            .map_err(|e| StoreError::backend("start upload", object_key, e.into_service_error()))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StoreError::backend("start upload", object_key, "no upload id returned"))?
            .to_string();

        let result = self.upload_parts(object_key, &upload_id, first, reader).await;

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.config.bucket_name)
                .key(object_key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(key = object_key, upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut ByteReader<'_>,
    ) -> Result<u64, StoreError> {
        let mut parts = Vec::new();
        let mut written = 0u64;
        let mut chunk = first;
        let mut part_number = 1i32;

        while !chunk.is_empty() {
            let size = chunk.len() as u64;
            let response = self
                .client
                .upload_part()
                .bucket(&self.config.bucket_name)
                .key(object_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| StoreError::backend("write part", object_key, e.into_service_error()))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            written += size;
            part_number += 1;

            chunk = read_chunk(reader, self.part_size())
                .await
                .map_err(|e| StoreError::backend("write", object_key, e))?;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket_name)
            .key(object_key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StoreError::backend("complete upload", object_key, e.into_service_error()))?;

        Ok(written)
    }
}

/// Read until `size` bytes are buffered or the reader is exhausted.
async fn read_chunk(reader: &mut ByteReader<'_>, size: usize) -> std::io::Result<Bytes> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, reader: &mut ByteReader<'_>) -> Result<u64, StoreError> {
        let object_key = self.object_key(key);
        let part_size = self.part_size();

        let first = read_chunk(reader, part_size)
            .await
            .map_err(|e| StoreError::backend("write", &object_key, e))?;

        if first.len() < part_size {
            let written = first.len() as u64;
            self.put_single(&object_key, first).await?;
            return Ok(written);
        }

        self.put_multipart(&object_key, first, reader).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let prefix = if self.config.key_prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.config.key_prefix.trim_matches('/'))
        };

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket_name)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("list", &self.config.bucket_name, e.into_service_error()))?;

            for object in response.contents() {
                let Some(full_key) = object.key() else { continue };
                let key = full_key.strip_prefix(&prefix).unwrap_or(full_key);
                // Only direct children of the prefix
                if !key.contains('/') && has_backup_suffix(key) {
                    keys.push(key.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let object_key = self.object_key(key);

        // DeleteObject succeeds for missing keys, so check first
        if let Err(e) = self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(&object_key)
            .send()
            .await
        {
            let service_error = e.into_service_error();
            if service_error.is_not_found() {
                return Err(StoreError::NotFound(key.to_string()));
            }
            return Err(StoreError::backend("delete", object_key, service_error));
        }

        self.client
            .delete_object()
            .bucket(&self.config.bucket_name)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StoreError::backend("delete", &object_key, e.into_service_error()))?;
        Ok(())
    }

    fn close(&self) {}

    fn backend(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_bucket_url() {
        let config = S3Config::from_url("s3://my-backups").unwrap();
        assert_eq!(config.bucket_name, "my-backups");
        assert_eq!(config.key_prefix, "");
        assert_eq!(config.region, None);
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_config_with_prefix_and_parameters() {
        let config = S3Config::from_url(
            "s3://my-backups/unifi/daily?region=eu-west-1&endpoint=http://minio:9000&force_path_style=true",
        )
        .unwrap();
        assert_eq!(config.bucket_name, "my-backups");
        assert_eq!(config.key_prefix, "unifi/daily");
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://minio:9000"));
        assert!(config.force_path_style);
    }

    #[test]
    fn test_config_requires_bucket() {
        assert!(S3Config::from_url("s3:///prefix").is_err());
        assert!(S3Config::from_url("gs://bucket").is_err());
    }

    #[tokio::test]
    async fn test_read_chunk_stops_at_size_and_eof() {
        let data = vec![7u8; 10];
        let mut reader: &[u8] = &data;

        let first = read_chunk(&mut reader, 4).await.unwrap();
        let second = read_chunk(&mut reader, 4).await.unwrap();
        let third = read_chunk(&mut reader, 4).await.unwrap();
        let fourth = read_chunk(&mut reader, 4).await.unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(third.len(), 2);
        assert!(fourth.is_empty());
    }
}
