//! Object store backends: S3 (or any S3-compatible endpoint) and a local
//! directory tree laid out as `{root}/{bucket}/{key}`.
//!
//! S3 requests are signed with [AWS Signature Version 4](crate::aws).
//! Custom endpoints (MinIO, LocalStack) use path-style URLs
//! `{endpoint}/{bucket}/{key}`; AWS itself uses virtual-hosted URLs
//! `https://{bucket}.s3.{region}.amazonaws.com/{key}`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use tracing::debug;

use ragline_core::source::ObjectStore;
use ragline_core::{Error, Result};

use crate::aws::{uri_encode, AwsCredentials, SigV4Signer};
use crate::config::ObjectStoreConfig;

pub struct S3ObjectStore {
    client: reqwest::Client,
    signer: SigV4Signer,
    region: String,
    endpoint_url: Option<String>,
    max_file_size: u64,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig, credentials: AwsCredentials) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            signer: SigV4Signer::new(credentials, &config.region, "s3"),
            region: config.region.clone(),
            endpoint_url: config
                .endpoint_url
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            max_file_size: config.max_file_size,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let raw = match self.endpoint_url {
            Some(ref endpoint) => format!("{}/{}/{}", endpoint, uri_encode(bucket), encoded_key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                bucket, self.region, encoded_key
            ),
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid object URL '{}': {}", raw, e)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, key)?;
        let headers = self.signer.sign("GET", &url, &[], b"", Utc::now());

        let mut request = self.client.get(url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(bucket, key, "fetching object");
        let resp = request.send().await.map_err(|e| {
            Error::ObjectStoreFailure(format!("failed to get s3://{}/{}: {}", bucket, key, e))
        })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("s3://{}/{}", bucket, key)));
        }
        if !status.is_success() {
            return Err(Error::ObjectStoreFailure(format!(
                "S3 GetObject failed (HTTP {}) for s3://{}/{}",
                status, bucket, key
            )));
        }

        let too_large = |len: u64| {
            Error::ParseFailure(format!(
                "s3://{}/{} is {} bytes, over the {} byte limit",
                bucket, key, len, self.max_file_size
            ))
        };
        if let Some(len) = resp.content_length() {
            if len > self.max_file_size {
                return Err(too_large(len));
            }
        }

        let bytes = resp.bytes().await.map_err(|e| {
            Error::ObjectStoreFailure(format!("failed to read s3://{}/{}: {}", bucket, key, e))
        })?;
        if bytes.len() as u64 > self.max_file_size {
            return Err(too_large(bytes.len() as u64));
        }
        Ok(bytes.to_vec())
    }
}

/// Objects as files under a local directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::NotFound(format!("{}/{}", bucket, key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => Err(Error::ObjectStoreFailure(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
