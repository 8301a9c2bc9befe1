//! Object store gateway: durable byte storage plus time-limited retrieval URLs.
//!
//! The orchestrator only ever hands this module an object key, a content
//! type and a TTL. Credentials and request shapes stay inside the backend
//! implementation, so the backend can be swapped without touching callers.

use async_trait::async_trait;
use s3::{Bucket, Region, creds::Credentials, error::S3Error};
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::config::S3Settings;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The backend refused the write (credentials, quota, network).
    #[error("object store rejected write of `{key}`: {reason}")]
    Write { key: String, reason: String },
    #[error("object `{0}` does not exist")]
    KeyNotFound(String),
    #[error("failed to sign retrieval url for `{key}`: {reason}")]
    SignUrl { key: String, reason: String },
    #[error("failed to list objects under `{prefix}`: {reason}")]
    List { prefix: String, reason: String },
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Byte source handed to [`ObjectStoreGateway::store`].
pub type ByteSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Remote object storage as seen by the upload workflow.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    /// Stream `source` to the backend under `object_key`.
    async fn store(
        &self,
        source: ByteSource<'_>,
        object_key: &str,
        content_type: &str,
    ) -> ObjectStoreResult<()>;

    /// Mint a URL granting read access to `object_key` for `ttl_secs` seconds.
    ///
    /// No guarantee is made that the object still exists when the URL is used.
    async fn create_signed_retrieval_url(
        &self,
        object_key: &str,
        ttl_secs: u32,
    ) -> ObjectStoreResult<String>;

    /// All keys currently stored under `prefix`.
    async fn list_keys(&self, prefix: &str) -> ObjectStoreResult<Vec<String>>;
}

/// S3-compatible backend (AWS S3, MinIO, Cloudflare R2).
///
/// Holds one long-lived bucket handle built at startup; it is shared by
/// reference across requests and never recreated.
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
    verify_before_sign: bool,
}

impl S3ObjectStore {
    pub fn new(bucket: Box<Bucket>, verify_before_sign: bool) -> Self {
        Self {
            bucket,
            verify_before_sign,
        }
    }

    /// Build the bucket handle from configuration.
    ///
    /// Missing access keys fall through to the credential provider chain
    /// (environment, profile, instance metadata).
    pub fn from_settings(settings: &S3Settings, verify_before_sign: bool) -> anyhow::Result<Self> {
        let credentials = Credentials::new(
            settings.access_key.as_deref(),
            settings.secret_key.as_deref(),
            None,
            None,
            None,
        )?;

        let bucket = match &settings.endpoint {
            Some(endpoint) => {
                let region = Region::Custom {
                    region: settings.region.clone(),
                    endpoint: endpoint.clone(),
                };
                Bucket::new(&settings.bucket, region, credentials)?.with_path_style()
            }
            None => {
                let region: Region = settings.region.parse()?;
                Bucket::new(&settings.bucket, region, credentials)?
            }
        };

        Ok(Self::new(bucket, verify_before_sign))
    }

    async fn ensure_exists(&self, object_key: &str) -> ObjectStoreResult<()> {
        match self.bucket.head_object(object_key).await {
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => {
                Err(ObjectStoreError::KeyNotFound(object_key.to_string()))
            }
            Ok(_) => Ok(()),
            Err(err) => Err(ObjectStoreError::SignUrl {
                key: object_key.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ObjectStoreGateway for S3ObjectStore {
    async fn store(
        &self,
        mut source: ByteSource<'_>,
        object_key: &str,
        content_type: &str,
    ) -> ObjectStoreResult<()> {
        self.bucket
            .put_object_stream_with_content_type(&mut source, object_key, content_type)
            .await
            .map_err(|err| ObjectStoreError::Write {
                key: object_key.to_string(),
                reason: err.to_string(),
            })?;
        debug!(object_key, content_type, "object stored");
        Ok(())
    }

    async fn create_signed_retrieval_url(
        &self,
        object_key: &str,
        ttl_secs: u32,
    ) -> ObjectStoreResult<String> {
        if self.verify_before_sign {
            self.ensure_exists(object_key).await?;
        }

        self.bucket
            .presign_get(object_key, ttl_secs, None)
            .await
            .map_err(|err| ObjectStoreError::SignUrl {
                key: object_key.to_string(),
                reason: err.to_string(),
            })
    }

    async fn list_keys(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let pages = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|err| ObjectStoreError::List {
                prefix: prefix.to_string(),
                reason: err.to_string(),
            })?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|object| object.key))
            .collect())
    }
}
