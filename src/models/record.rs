//! Represents one successfully stored upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata about a file whose bytes live in the object store.
///
/// A record is written exactly once, after its object was stored, and is
/// never updated afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    /// External lookup handle, assigned at creation.
    pub id: Uuid,

    /// Location of the bytes in the object store (`<prefix>/<staged>.<ext>`).
    pub object_key: String,

    /// File name supplied by the uploading client. Not unique.
    pub original_name: String,

    /// Free-text description supplied alongside the file.
    pub description: Option<String>,

    /// When the record was created.
    pub upload_timestamp: DateTime<Utc>,
}

impl UploadRecord {
    /// Build a fresh record with a new id and the current time.
    pub fn new(
        object_key: impl Into<String>,
        original_name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            object_key: object_key.into(),
            original_name: original_name.into(),
            description,
            upload_timestamp: Utc::now(),
        }
    }
}
