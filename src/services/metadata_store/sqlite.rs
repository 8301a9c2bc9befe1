//! SQLite-backed metadata store.
//!
//! Each append is a single `INSERT`, so SQLite's own locking serializes
//! concurrent writers. Insertion order is the `seq` autoincrement column.

use super::{MetadataResult, MetadataStore};
use crate::models::record::UploadRecord;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

const SELECT_RECORDS: &str = "SELECT id, object_key, original_name, description, upload_timestamp
     FROM upload_records";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn append(&self, record: &UploadRecord) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO upload_records (id, object_key, original_name, description, upload_timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.object_key)
        .bind(&record.original_name)
        .bind(record.description.as_deref())
        .bind(record.upload_timestamp)
        .execute(&*self.db)
        .await?;

        debug!(record_id = %record.id, "record inserted");
        Ok(())
    }

    async fn load_all(&self) -> MetadataResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRecord>(&format!("{SELECT_RECORDS} ORDER BY seq ASC"))
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn find_by_original_name(&self, name: &str) -> MetadataResult<Option<UploadRecord>> {
        let row = sqlx::query_as::<_, UploadRecord>(&format!(
            "{SELECT_RECORDS} WHERE original_name = ? ORDER BY seq ASC LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn find_all_by_original_name(&self, name: &str) -> MetadataResult<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRecord>(&format!(
            "{SELECT_RECORDS} WHERE original_name = ? ORDER BY seq ASC"
        ))
        .bind(name)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> MetadataResult<Option<UploadRecord>> {
        let row = sqlx::query_as::<_, UploadRecord>(&format!("{SELECT_RECORDS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn check_ready(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM upload_records")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
