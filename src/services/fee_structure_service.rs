use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::auth::Actor;
use crate::collaborators::{record_best_effort, AuditAction, AuditEvent, AuditSink};
use crate::database::store::FeeStore;
use crate::fees::{FeeError, FeeHeads, FeeResult, FeeStructure};

const MODULE: &str = "fee_structure";

/// Per-class fee menus. Editing a structure never touches existing records.
#[derive(Clone)]
pub struct FeeStructureService {
    store: Arc<dyn FeeStore>,
    audit: Arc<dyn AuditSink>,
}

impl FeeStructureService {
    pub fn new(store: Arc<dyn FeeStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn set_fee_structure(
        &self,
        actor: &Actor,
        class_id: Uuid,
        fee_head: FeeHeads,
    ) -> FeeResult<FeeStructure> {
        self.store
            .get_class(actor.school_id, class_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Class not found"))?;

        let structure = FeeStructure::new(actor.school_id, class_id, fee_head)?;
        let saved = self.store.upsert_fee_structure(structure).await?;

        info!(
            school = %saved.school_id,
            class = %saved.class_id,
            total = %saved.total_amount,
            "Fee structure saved"
        );
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Update,
                MODULE,
                Some(saved.id),
                format!("Set fee structure for class {} (total {})", class_id, saved.total_amount),
            ),
        )
        .await;
        Ok(saved)
    }

    pub async fn get_fee_structure_by_class(&self, school_id: Uuid, class_id: Uuid) -> FeeResult<FeeStructure> {
        self.store
            .get_fee_structure(school_id, class_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Fee Structure not defined for this Class"))
    }

    pub async fn list_fee_structures(&self, school_id: Uuid) -> FeeResult<Vec<FeeStructure>> {
        Ok(self.store.list_fee_structures(school_id).await?)
    }
}
