//! AWS S3 fallback storage.
//!
//! Objects land under `{bucket}/{prefix}/{file}` and are handed out through a
//! presigned GET URL, so the bucket itself can stay private.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::models::FallbackConfig;
use crate::storage::{FallbackStorage, remote_file_name};

/// S3-backed fallback storage.
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
    link_ttl: Duration,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        link_ttl: Duration,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            link_ttl,
        }
    }

    /// Create S3 storage using the ambient AWS credentials chain.
    pub async fn from_config(config: &FallbackConfig) -> Result<Self> {
        if config.s3_bucket.is_empty() {
            return Err(AppError::config("fallback.s3_bucket is required for the s3 provider"));
        }
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Ok(Self::new(
            Client::new(&aws),
            &config.s3_bucket,
            &config.s3_prefix,
            Duration::from_secs(config.s3_link_ttl_secs),
        ))
    }

    fn key(&self, file_name: &str) -> String {
        object_key(&self.prefix, file_name)
    }
}

/// Object key for `file_name` under `prefix`.
fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

#[async_trait]
impl FallbackStorage for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn store(&self, path: &Path) -> Result<String> {
        let key = self.key(&remote_file_name(path)?);
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| AppError::S3(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| AppError::S3(e.into_service_error().to_string()))?;
        log::info!("Wrote {} to s3://{}/{}", path.display(), self.bucket, key);

        let presigning =
            PresigningConfig::expires_in(self.link_ttl).map_err(|e| AppError::S3(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::S3(e.into_service_error().to_string()))?;

        Ok(request.uri().to_string())
    }
}
