use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::store::{StoreError, StoreResult};

/// Snapshot of a row taken before it is hard-deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub school_id: Uuid,
    pub category: &'static str,
    pub original_id: Uuid,
    pub snapshot: Value,
    pub deleted_by: Uuid,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Store the snapshot; returns the archive row id
    async fn archive(&self, record: ArchiveRecord) -> StoreResult<Uuid>;

    /// Drop an archive row whose original could not be deleted after all
    async fn discard(&self, school_id: Uuid, archive_id: Uuid) -> StoreResult<()>;
}

pub struct PgArchiveSink {
    pool: PgPool,
}

impl PgArchiveSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveSink for PgArchiveSink {
    async fn archive(&self, record: ArchiveRecord) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO archives (id, school_id, category, original_id, snapshot, deleted_by, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(record.school_id)
        .bind(record.category)
        .bind(record.original_id)
        .bind(Json(record.snapshot))
        .bind(record.deleted_by)
        .bind(record.reason)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn discard(&self, school_id: Uuid, archive_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM archives WHERE id = $1 AND school_id = $2")
            .bind(archive_id)
            .bind(school_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArchiveSink {
    records: Mutex<Vec<(Uuid, ArchiveRecord)>>,
    unavailable: AtomicBool,
}

impl MemoryArchiveSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ArchiveRecord> {
        self.records.lock().await.iter().map(|(_, record)| record.clone()).collect()
    }

    /// Make archiving fail, simulating an unavailable archive
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchiveSink {
    async fn archive(&self, record: ArchiveRecord) -> StoreResult<Uuid> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let id = Uuid::new_v4();
        self.records.lock().await.push((id, record));
        Ok(id)
    }

    async fn discard(&self, school_id: Uuid, archive_id: Uuid) -> StoreResult<()> {
        self.records
            .lock()
            .await
            .retain(|(id, record)| !(*id == archive_id && record.school_id == school_id));
        Ok(())
    }
}
