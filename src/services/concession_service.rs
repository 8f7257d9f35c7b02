use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::collaborators::{record_best_effort, AuditAction, AuditEvent, AuditSink, ObjectStorage};
use crate::database::store::FeeStore;
use crate::fees::{compute_concession, ConcessionTerms, ConcessionType, FeeError, FeeHead, FeeResult, StudentRecord};

const MODULE: &str = "concession";

/// A supporting document, already decoded
#[derive(Debug, Clone)]
pub struct ProofUpload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub struct ApplyConcessionRequest {
    pub concession_type: ConcessionType,
    pub value: Decimal,
    pub remark: String,
    pub target_heads: Option<Vec<FeeHead>>,
    pub proof: Option<ProofUpload>,
}

#[derive(Clone)]
pub struct ConcessionService {
    store: Arc<dyn FeeStore>,
    storage: Arc<dyn ObjectStorage>,
    audit: Arc<dyn AuditSink>,
}

impl ConcessionService {
    pub fn new(store: Arc<dyn FeeStore>, storage: Arc<dyn ObjectStorage>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, storage, audit }
    }

    async fn load(&self, school_id: Uuid, record_id: Uuid) -> FeeResult<StudentRecord> {
        self.store
            .get_record(school_id, record_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student record not found"))
    }

    pub async fn apply_concession(
        &self,
        actor: &Actor,
        record_id: Uuid,
        request: ApplyConcessionRequest,
    ) -> FeeResult<StudentRecord> {
        let record = self.load(actor.school_id, record_id).await?;
        let terms = ConcessionTerms {
            concession_type: request.concession_type,
            value: request.value,
            remark: request.remark,
            approved_by: actor.user_id,
            target_heads: request.target_heads,
        };
        let mut concession = compute_concession(&record, &terms)?;

        // A supplied proof must be stored before anything is written
        if let Some(proof) = request.proof {
            let stored = self
                .storage
                .store(proof.bytes, &proof.mime)
                .await
                .map_err(|e| FeeError::dependency(format!("Concession proof upload failed: {}", e)))?;
            concession.proof_ref = Some(stored.key);
        }

        let in_amount = concession.in_amount;
        let mut next = record.clone();
        next.apply_concession(concession)?;
        let saved = self.store.update_record(next, record.version).await?;

        info!(record = %saved.id, amount = %in_amount, "Concession applied");
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Approve,
                MODULE,
                Some(saved.id),
                format!("Approved concession of {} for student {}", in_amount, saved.student_id),
            ),
        )
        .await;
        Ok(saved)
    }

    pub async fn revoke_concession(&self, actor: &Actor, record_id: Uuid, reason: &str) -> FeeResult<StudentRecord> {
        if reason.trim().is_empty() {
            return Err(FeeError::validation("A reason is required to revoke a concession"));
        }
        let record = self.load(actor.school_id, record_id).await?;

        let mut next = record.clone();
        let revoked = next.revoke_concession().map_err(|e| {
            warn!(record = %record.id, "Revoke rejected: {}", e);
            e
        })?;
        let saved = self.store.update_record(next, record.version).await?;

        info!(record = %saved.id, amount = %revoked.in_amount, "Concession revoked");
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Revoke,
                MODULE,
                Some(saved.id),
                format!("Revoked concession of {}: {}", revoked.in_amount, reason.trim()),
            ),
        )
        .await;
        Ok(saved)
    }

    /// Short-lived link to a stored proof document
    pub fn proof_url(&self, proof_ref: &str) -> String {
        self.storage.sign(proof_ref, std::time::Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::collaborators::{LocalObjectStorage, MemoryAuditSink, UrlSigner};
    use crate::database::memory::MemoryStore;
    use crate::fees::{EnrollmentKind, FeeHeads, FeeStructure, Placement};

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    async fn fixture(root: &std::path::Path) -> (ConcessionService, Actor, StudentRecord) {
        let store = Arc::new(MemoryStore::new());
        let actor = Actor {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let structure = FeeStructure::new(
            actor.school_id,
            Uuid::new_v4(),
            FeeHeads {
                admission_fee: d(5000),
                first_term_amt: d(3000),
                ..Default::default()
            },
        )
        .unwrap();
        let record = StudentRecord::seed(
            Placement {
                school_id: actor.school_id,
                student_id: Uuid::new_v4(),
                academic_year: "2025-2026".into(),
                class_id: structure.class_id,
                section_id: Uuid::new_v4(),
                class_name: "V".into(),
                section_name: "A".into(),
                new_old: EnrollmentKind::New,
                roll_number: None,
                is_bus_applicable: false,
            },
            &structure,
        );
        let record = store.upsert_unpaid_record(record).await.unwrap();
        let storage = Arc::new(LocalObjectStorage::new(
            root,
            UrlSigner::new("http://files.test", "test-key"),
        ));
        let service = ConcessionService::new(store, storage, Arc::new(MemoryAuditSink::new()));
        (service, actor, record)
    }

    fn flat(amount: i64, proof: Option<ProofUpload>) -> ApplyConcessionRequest {
        ApplyConcessionRequest {
            concession_type: ConcessionType::Amount,
            value: d(amount),
            remark: "Sibling discount".into(),
            target_heads: None,
            proof,
        }
    }

    #[tokio::test]
    async fn applies_with_proof_then_revokes() {
        let dir = tempfile::tempdir().unwrap();
        let (service, actor, record) = fixture(dir.path()).await;
        let proof = ProofUpload {
            bytes: b"%PDF-1.4 letter".to_vec(),
            mime: "application/pdf".into(),
        };

        let applied = service
            .apply_concession(&actor, record.id, flat(1000, Some(proof)))
            .await
            .unwrap();
        assert_eq!(applied.outstanding(), d(7000));
        let proof_ref = applied.concession.proof_ref.clone().expect("proof stored");
        assert!(service.proof_url(&proof_ref).contains("signature="));

        let again = service.apply_concession(&actor, record.id, flat(500, None)).await;
        assert!(matches!(again, Err(FeeError::Conflict(_))));

        let revoked = service.revoke_concession(&actor, record.id, "Entered twice").await.unwrap();
        assert!(!revoked.concession.is_applied);
        assert_eq!(revoked.outstanding(), d(8000));
    }

    #[tokio::test]
    async fn failed_proof_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (service, actor, record) = fixture(dir.path()).await;
        let proof = ProofUpload {
            bytes: b"MZ".to_vec(),
            mime: "application/x-msdownload".into(),
        };

        let err = service
            .apply_concession(&actor, record.id, flat(1000, Some(proof)))
            .await
            .unwrap_err();
        assert!(matches!(err, FeeError::DependencyFailure(_)));

        let unchanged = service.store.get_record(actor.school_id, record.id).await.unwrap().unwrap();
        assert!(!unchanged.concession.is_applied);
        assert_eq!(unchanged.version, record.version);
    }
}
