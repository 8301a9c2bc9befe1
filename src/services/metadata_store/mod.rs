//! Metadata store: the durable, ordered list of [`UploadRecord`]s.
//!
//! Two backends are provided:
//! - [`SqliteMetadataStore`]: one row per record, insert-only.
//! - [`JsonLinesMetadataStore`]: an append-only JSON Lines file.
//!
//! Neither rewrites the whole collection on append, so concurrent uploads
//! cannot lose each other's records.

pub mod json_file;
pub mod sqlite;

pub use json_file::JsonLinesMetadataStore;
pub use sqlite::SqliteMetadataStore;

use crate::models::record::UploadRecord;
use async_trait::async_trait;
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("records file is corrupt at line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist one record after any existing ones.
    async fn append(&self, record: &UploadRecord) -> MetadataResult<()>;

    /// Every record in insertion order. Empty before the first append.
    async fn load_all(&self) -> MetadataResult<Vec<UploadRecord>>;

    /// The earliest record whose `original_name` equals `name` exactly.
    async fn find_by_original_name(&self, name: &str) -> MetadataResult<Option<UploadRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|record| record.original_name == name))
    }

    /// Every record named `name`, in insertion order.
    async fn find_all_by_original_name(&self, name: &str) -> MetadataResult<Vec<UploadRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|record| record.original_name == name)
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> MetadataResult<Option<UploadRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|record| record.id == id))
    }

    /// Cheap reachability check used by the readiness endpoint.
    async fn check_ready(&self) -> MetadataResult<()>;
}
