//! src/services/upload_service.rs
//!
//! UploadService sequences the object store and the metadata store into
//! the upload and resolve workflows.
//!
//! Upload: `Received → Stored → Recorded → Cleaned`, or
//! `Received → Failed → CleanedOnError`. The object is always stored before
//! its record is written, so a record never points at a missing object. If
//! the record write fails the object is left orphaned; see
//! [`UploadService::find_orphaned_objects`].

use crate::{
    models::record::UploadRecord,
    services::{
        metadata_store::{MetadataError, MetadataStore},
        object_store::{ObjectStoreError, ObjectStoreGateway},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file field in upload")]
    MissingFile,
    #[error("malformed upload body: {0}")]
    InvalidBody(String),
    #[error("upload body exceeds the size limit")]
    TooLarge,
    #[error("failed to stage upload: {0}")]
    Staging(#[from] io::Error),
    #[error(transparent)]
    StorageWrite(ObjectStoreError),
    #[error("object `{object_key}` stored but its record was not written: {source}")]
    PersistenceWrite {
        object_key: String,
        #[source]
        source: MetadataError,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no record matches `{0}`")]
    RecordNotFound(String),
    #[error("record points at missing object `{0}`")]
    ObjectMissing(String),
    #[error(transparent)]
    Lookup(#[from] MetadataError),
    #[error(transparent)]
    SignedUrl(ObjectStoreError),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Listing(#[from] ObjectStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Marker a body stream yields (wrapped in `io::Error`) when the client
/// sent more bytes than the service accepts.
#[derive(Debug, Error)]
#[error("upload body exceeds the size limit")]
pub struct BodyTooLarge;

/// A resolved record plus a URL that reads its bytes until `expires_at`.
#[derive(Debug, Clone)]
pub struct SignedRetrieval {
    pub record: UploadRecord,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Transient local copy of an uploaded file.
///
/// Removed by [`StagingFile::remove`] at the end of the workflow. If the
/// guard is dropped first (error paths, cancelled requests) the file is
/// removed synchronously on drop.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    staged_name: String,
    armed: bool,
}

impl StagingFile {
    fn new(dir: &Path) -> Self {
        let staged_name = Uuid::new_v4().simple().to_string();
        Self {
            path: dir.join(&staged_name),
            staged_name,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Server-assigned file name, unique per upload.
    pub fn staged_name(&self) -> &str {
        &self.staged_name
    }

    /// Delete the staging file. Failures are logged, never returned.
    pub async fn remove(mut self) {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(_) => debug!("removed staging file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("staging file {} already missing", self.path.display());
            }
            Err(err) => warn!(
                "failed to remove staging file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove staging file {} on drop: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}

fn body_stream_error(err: io::Error) -> UploadError {
    match err.get_ref() {
        Some(inner) if inner.is::<BodyTooLarge>() => UploadError::TooLarge,
        _ => UploadError::InvalidBody(err.to_string()),
    }
}

/// Build the object key `<prefix>/<staged>.<ext>`.
///
/// `ext` is whatever follows the last `.` of the client's file name. With no
/// extension the key is `<prefix>/<staged>`, without a trailing dot.
pub fn derive_object_key(prefix: &str, staged_name: &str, original_name: &str) -> String {
    match extension_of(original_name) {
        Some(ext) => format!("{prefix}/{staged_name}.{ext}"),
        None => format!("{prefix}/{staged_name}"),
    }
}

fn extension_of(original_name: &str) -> Option<&str> {
    // Browsers on some platforms send full client paths.
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    base.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Upload/resolve orchestrator. Cheap to clone; shared as router state.
#[derive(Clone)]
pub struct UploadService {
    pub gateway: Arc<dyn ObjectStoreGateway>,
    pub metadata: Arc<dyn MetadataStore>,

    /// Directory holding staging files while uploads are in flight.
    pub staging_dir: PathBuf,

    /// Logical folder inside the bucket for every object key.
    pub key_prefix: String,

    /// Lifetime of minted retrieval URLs.
    pub url_ttl_secs: u32,
}

impl UploadService {
    pub fn new(
        gateway: Arc<dyn ObjectStoreGateway>,
        metadata: Arc<dyn MetadataStore>,
        staging_dir: impl Into<PathBuf>,
        key_prefix: impl Into<String>,
        url_ttl_secs: u32,
    ) -> Self {
        Self {
            gateway,
            metadata,
            staging_dir: staging_dir.into(),
            key_prefix: key_prefix.into(),
            url_ttl_secs,
        }
    }

    /// Stream an incoming file body into a fresh staging file.
    ///
    /// Stream errors are the client's fault and map to `InvalidBody`, or to
    /// `TooLarge` when they carry [`BodyTooLarge`]; local write errors map to
    /// `Staging`. Either way the partial file is removed.
    pub async fn stage<S>(&self, stream: S) -> Result<StagingFile, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(&self.staging_dir).await?;
        let staged = StagingFile::new(&self.staging_dir);
        let mut file = File::create(staged.path()).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(body_stream_error)?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(
            staged_name = staged.staged_name(),
            size_bytes, "upload received"
        );
        Ok(staged)
    }

    /// Push a staged file to the object store, then record it.
    ///
    /// The staging file is removed on every path before returning.
    pub async fn upload(
        &self,
        staged: StagingFile,
        original_name: &str,
        content_type: &str,
        description: Option<String>,
    ) -> Result<UploadRecord, UploadError> {
        let object_key = derive_object_key(&self.key_prefix, staged.staged_name(), original_name);

        let outcome = self
            .store_and_record(&staged, &object_key, original_name, content_type, description)
            .await;
        staged.remove().await;

        match &outcome {
            Ok(record) => info!(
                record_id = %record.id,
                object_key = %object_key,
                original_name,
                "upload recorded"
            ),
            Err(err) => error!(
                object_key = %object_key,
                original_name,
                "upload failed: {}",
                err
            ),
        }
        outcome
    }

    async fn store_and_record(
        &self,
        staged: &StagingFile,
        object_key: &str,
        original_name: &str,
        content_type: &str,
        description: Option<String>,
    ) -> Result<UploadRecord, UploadError> {
        let mut file = File::open(staged.path()).await?;
        self.gateway
            .store(&mut file, object_key, content_type)
            .await
            .map_err(UploadError::StorageWrite)?;
        debug!(object_key, "upload stored");

        let record = UploadRecord::new(object_key, original_name, description);
        self.metadata
            .append(&record)
            .await
            .map_err(|source| UploadError::PersistenceWrite {
                object_key: object_key.to_string(),
                source,
            })?;
        Ok(record)
    }

    /// Find the record for `handle` and mint a retrieval URL for it.
    ///
    /// A handle that is a known record id wins; anything else is matched
    /// against original file names, earliest upload first. The object
    /// store is not contacted when nothing matches.
    pub async fn resolve(&self, handle: &str) -> Result<SignedRetrieval, ResolveError> {
        let record = self
            .lookup(handle)
            .await?
            .ok_or_else(|| ResolveError::RecordNotFound(handle.to_string()))?;

        let url = self
            .gateway
            .create_signed_retrieval_url(&record.object_key, self.url_ttl_secs)
            .await
            .map_err(|err| match err {
                ObjectStoreError::KeyNotFound(key) => ResolveError::ObjectMissing(key),
                other => ResolveError::SignedUrl(other),
            })?;
        let expires_at = Utc::now() + Duration::seconds(i64::from(self.url_ttl_secs));

        debug!(record_id = %record.id, object_key = %record.object_key, "retrieval url minted");
        Ok(SignedRetrieval {
            record,
            url,
            expires_at,
        })
    }

    async fn lookup(&self, handle: &str) -> Result<Option<UploadRecord>, MetadataError> {
        if let Ok(id) = Uuid::parse_str(handle) {
            if let Some(record) = self.metadata.find_by_id(id).await? {
                return Ok(Some(record));
            }
        }
        self.metadata.find_by_original_name(handle).await
    }

    /// Every record named `name`, in upload order.
    pub async fn search(&self, name: &str) -> Result<Vec<UploadRecord>, MetadataError> {
        self.metadata.find_all_by_original_name(name).await
    }

    pub async fn list(&self) -> Result<Vec<UploadRecord>, MetadataError> {
        self.metadata.load_all().await
    }

    /// Keys under the upload prefix that no record references.
    ///
    /// These are left behind when the record write fails after the object
    /// was stored. Reported only; nothing is deleted.
    pub async fn find_orphaned_objects(&self) -> Result<Vec<String>, ReconcileError> {
        let prefix = format!("{}/", self.key_prefix);
        let keys = self.gateway.list_keys(&prefix).await?;
        let known = self
            .metadata
            .load_all()
            .await?
            .into_iter()
            .map(|record| record.object_key)
            .collect::<HashSet<_>>();

        Ok(keys.into_iter().filter(|key| !known.contains(key)).collect())
    }
}
