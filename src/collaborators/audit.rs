use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::database::store::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Collect,
    Cancel,
    Approve,
    Revoke,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Collect => "COLLECT",
            AuditAction::Cancel => "CANCEL",
            AuditAction::Approve => "APPROVE",
            AuditAction::Revoke => "REVOKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub school_id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: Role,
    pub action: AuditAction,
    pub module: &'static str,
    pub target_id: Option<Uuid>,
    pub description: String,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(
        actor: &Actor,
        action: AuditAction,
        module: &'static str,
        target_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            school_id: actor.school_id,
            actor_id: actor.user_id,
            actor_role: actor.role,
            action,
            module,
            target_id,
            description: description.into(),
            status: AuditStatus::Success,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()>;
}

/// Audit failures never undo the write being audited
pub async fn record_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event).await {
        tracing::warn!(
            action = event.action.as_str(),
            module = event.module,
            target = ?event.target_id,
            "Audit entry dropped: {}",
            e
        );
    }
}

/// Writes audit events to the log stream
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        tracing::info!(
            target: "audit",
            school = %event.school_id,
            actor = %event.actor_id,
            role = event.actor_role.as_str(),
            action = event.action.as_str(),
            module = event.module,
            target_id = ?event.target_id,
            status = event.status.as_str(),
            "{}",
            event.description
        );
        Ok(())
    }
}

pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, school_id, actor_id, actor_role, action, module, target_id, \
             description, status, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id)
        .bind(event.school_id)
        .bind(event.actor_id)
        .bind(event.actor_role.as_str())
        .bind(event.action.as_str())
        .bind(event.module)
        .bind(event.target_id)
        .bind(&event.description)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory audit sink for testing
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
