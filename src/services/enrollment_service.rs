use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{load_school, resolve_academic_year};
use crate::auth::Actor;
use crate::collaborators::{record_best_effort, ArchiveRecord, ArchiveSink, AuditAction, AuditEvent, AuditSink};
use crate::database::models::School;
use crate::database::store::{FeeStore, RecordFilter};
use crate::fees::{EnrollmentKind, FeeError, FeeResult, Placement, StudentRecord};

const MODULE: &str = "enrollment";
const ARCHIVE_CATEGORY: &str = "StudentRecord";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub section_id: Uuid,
    pub academic_year: Option<String>,
    #[serde(default)]
    pub is_bus_applicable: bool,
    pub new_old: Option<EnrollmentKind>,
    pub roll_number: Option<String>,
}

/// Binds students to a class and section for a year, and refuses to move or
/// remove them once money has been paid against that year.
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn FeeStore>,
    audit: Arc<dyn AuditSink>,
    archive: Arc<dyn ArchiveSink>,
}

/// The student profile mirrors placement only for the live year
fn mirrors_profile(school: &School, academic_year: &str) -> bool {
    school
        .current_academic_year
        .as_deref()
        .map_or(true, |current| current == academic_year)
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn FeeStore>, audit: Arc<dyn AuditSink>, archive: Arc<dyn ArchiveSink>) -> Self {
        Self { store, audit, archive }
    }

    pub async fn assign(&self, actor: &Actor, request: AssignRequest) -> FeeResult<StudentRecord> {
        let school = load_school(self.store.as_ref(), actor.school_id).await?;
        let academic_year = resolve_academic_year(&school, request.academic_year)?;

        let existing = self
            .store
            .find_record(actor.school_id, request.student_id, &academic_year)
            .await?;
        if let Some(current) = &existing {
            if let Err(e) = current.ensure_unlocked() {
                warn!(
                    student = %request.student_id,
                    year = %academic_year,
                    paid = %current.paid_total(),
                    "Rejected class change on a paid enrollment"
                );
                return Err(e);
            }
        }

        let structure = self
            .store
            .get_fee_structure(actor.school_id, request.class_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Fee Structure not defined for this Class"))?;
        let class = self
            .store
            .get_class(actor.school_id, request.class_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Class not found"))?;
        let section = self
            .store
            .get_section(actor.school_id, request.section_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Section not found"))?;
        if section.class_id != class.id {
            return Err(FeeError::validation(format!(
                "Section {} does not belong to class {}",
                section.name, class.name
            )));
        }

        let placement = Placement {
            school_id: actor.school_id,
            student_id: request.student_id,
            academic_year: academic_year.clone(),
            class_id: class.id,
            section_id: section.id,
            class_name: class.name,
            section_name: section.name,
            new_old: request.new_old.unwrap_or_default(),
            roll_number: request.roll_number,
            is_bus_applicable: request.is_bus_applicable,
        };
        let record = match existing {
            Some(current) => current.reseat(placement, &structure)?,
            None => StudentRecord::seed(placement, &structure),
        };
        record.check_invariants()?;

        // Conditioned on paid_total = 0 at write time
        let saved = self.store.upsert_unpaid_record(record).await.map_err(|e| {
            warn!(student = %request.student_id, "Enrollment write lost its safety lock: {}", e);
            FeeError::from(e)
        })?;

        if mirrors_profile(&school, &academic_year) {
            if let Err(e) = self
                .store
                .set_student_placement(actor.school_id, saved.student_id, Some(saved.class_id), Some(saved.section_id))
                .await
            {
                error!(student = %saved.student_id, "Dependency failure mirroring student placement: {}", e);
            }
        }

        info!(
            record = %saved.id,
            student = %saved.student_id,
            class = %saved.class_name_snapshot,
            section = %saved.section_name_snapshot,
            year = %saved.academic_year,
            "Student assigned"
        );
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Update,
                MODULE,
                Some(saved.id),
                format!(
                    "Assigned student {} to {} {} for {}",
                    saved.student_id, saved.class_name_snapshot, saved.section_name_snapshot, saved.academic_year
                ),
            ),
        )
        .await;
        Ok(saved)
    }

    /// Archive then delete an enrollment that has no payments
    pub async fn remove(
        &self,
        actor: &Actor,
        student_id: Uuid,
        academic_year: Option<String>,
        reason: Option<String>,
    ) -> FeeResult<StudentRecord> {
        let school = load_school(self.store.as_ref(), actor.school_id).await?;
        let academic_year = resolve_academic_year(&school, academic_year)?;

        let record = self
            .store
            .find_record(actor.school_id, student_id, &academic_year)
            .await?
            .ok_or_else(|| FeeError::not_found(format!("No enrollment for this student in {}", academic_year)))?;
        if let Err(e) = record.ensure_unlocked() {
            warn!(record = %record.id, paid = %record.paid_total(), "Rejected removal of a paid enrollment");
            return Err(e);
        }

        let snapshot = serde_json::to_value(&record)
            .map_err(|e| FeeError::invariant(format!("Record snapshot failed: {}", e)))?;
        let archive_id = self
            .archive
            .archive(ArchiveRecord {
                school_id: actor.school_id,
                category: ARCHIVE_CATEGORY,
                original_id: record.id,
                snapshot,
                deleted_by: actor.user_id,
                reason,
            })
            .await
            .map_err(|e| FeeError::dependency(format!("Archive failed, enrollment kept: {}", e)))?;

        // A payment can land between the archive and the delete
        if let Err(e) = self.store.delete_unpaid_record(actor.school_id, record.id).await {
            warn!(record = %record.id, archive = %archive_id, "Enrollment delete failed after archiving: {}", e);
            if let Err(discard_err) = self.archive.discard(actor.school_id, archive_id).await {
                error!(
                    record = %record.id,
                    archive = %archive_id,
                    "Orphaned archive row for an enrollment that was not deleted: {}",
                    discard_err
                );
            }
            return Err(e.into());
        }

        if school.current_academic_year.as_deref() == Some(academic_year.as_str()) {
            if let Err(e) = self
                .store
                .set_student_placement(actor.school_id, student_id, None, None)
                .await
            {
                error!(student = %student_id, "Dependency failure clearing student placement: {}", e);
            }
        }

        info!(record = %record.id, student = %student_id, year = %academic_year, "Enrollment removed");
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Delete,
                MODULE,
                Some(record.id),
                format!("Removed student {} from {} for {}", student_id, record.class_name_snapshot, academic_year),
            ),
        )
        .await;
        Ok(record)
    }

    pub async fn get_record(&self, school_id: Uuid, record_id: Uuid) -> FeeResult<StudentRecord> {
        self.store
            .get_record(school_id, record_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student record not found"))
    }

    pub async fn find_record(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        academic_year: Option<String>,
    ) -> FeeResult<StudentRecord> {
        let school = load_school(self.store.as_ref(), school_id).await?;
        let academic_year = resolve_academic_year(&school, academic_year)?;
        self.store
            .find_record(school_id, student_id, &academic_year)
            .await?
            .ok_or_else(|| FeeError::not_found(format!("No enrollment for this student in {}", academic_year)))
    }

    pub async fn list_records(&self, filter: &RecordFilter) -> FeeResult<Vec<StudentRecord>> {
        Ok(self.store.list_records(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::auth::Role;
    use crate::collaborators::{MemoryArchiveSink, MemoryAuditSink};
    use crate::database::memory::MemoryStore;
    use crate::database::models::{SchoolClass, Section, Student};
    use crate::database::store::StoreResult;
    use crate::fees::{Allocation, FeeHead, FeeHeads, FeeStructure};

    const YEAR: &str = "2025-2026";

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        archive: Arc<MemoryArchiveSink>,
        actor: Actor,
        class_id: Uuid,
        section_id: Uuid,
        student_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let actor = Actor {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        store
            .add_school(School {
                id: actor.school_id,
                name: "Riverside School".into(),
                current_academic_year: Some(YEAR.into()),
                created_at: Utc::now(),
            })
            .await;
        let class_id = Uuid::new_v4();
        let section_id = Uuid::new_v4();
        store
            .add_class(SchoolClass {
                id: class_id,
                school_id: actor.school_id,
                name: "VII".into(),
            })
            .await;
        store
            .add_section(Section {
                id: section_id,
                school_id: actor.school_id,
                class_id,
                name: "B".into(),
            })
            .await;
        let student_id = Uuid::new_v4();
        store
            .add_student(Student {
                id: student_id,
                school_id: actor.school_id,
                name: "Asha".into(),
                current_class_id: None,
                current_section_id: None,
            })
            .await;
        Fixture {
            store,
            archive: Arc::new(MemoryArchiveSink::new()),
            actor,
            class_id,
            section_id,
            student_id,
        }
    }

    impl Fixture {
        fn service(&self, archive: Arc<dyn ArchiveSink>) -> EnrollmentService {
            EnrollmentService::new(self.store.clone(), Arc::new(MemoryAuditSink::new()), archive)
        }

        async fn define_structure(&self) {
            let structure = FeeStructure::new(
                self.actor.school_id,
                self.class_id,
                FeeHeads {
                    admission_fee: d(5000),
                    first_term_amt: d(3000),
                    bus_first_term_amt: d(800),
                    bus_second_term_amt: d(700),
                    ..Default::default()
                },
            )
            .unwrap();
            self.store.upsert_fee_structure(structure).await.unwrap();
        }

        fn request(&self, bus: bool) -> AssignRequest {
            AssignRequest {
                student_id: self.student_id,
                class_id: self.class_id,
                section_id: self.section_id,
                academic_year: None,
                is_bus_applicable: bus,
                new_old: None,
                roll_number: None,
            }
        }
    }

    /// Archive sink that lets a payment land on the record right after the
    /// snapshot is written
    struct PaymentDuringArchive {
        inner: Arc<MemoryArchiveSink>,
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ArchiveSink for PaymentDuringArchive {
        async fn archive(&self, record: ArchiveRecord) -> StoreResult<Uuid> {
            let id = self.inner.archive(record.clone()).await?;
            let mut current = self.store.get_record(record.school_id, record.original_id).await?.unwrap();
            let version = current.version;
            let allocation = Allocation::allocate(d(1000), &current.dues, None).unwrap();
            current.apply_allocation(&allocation).unwrap();
            self.store.update_record(current, version).await?;
            Ok(id)
        }

        async fn discard(&self, school_id: Uuid, archive_id: Uuid) -> StoreResult<()> {
            self.inner.discard(school_id, archive_id).await
        }
    }

    #[tokio::test]
    async fn assign_requires_a_fee_structure() {
        let fx = fixture().await;
        let service = fx.service(fx.archive.clone());

        let err = service.assign(&fx.actor, fx.request(false)).await.unwrap_err();
        assert!(matches!(err, FeeError::NotFound(ref m) if m == "Fee Structure not defined for this Class"));
        assert!(fx.store.find_record(fx.actor.school_id, fx.student_id, YEAR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bus_assignment_carries_bus_heads() {
        let fx = fixture().await;
        fx.define_structure().await;
        let service = fx.service(fx.archive.clone());

        let with_bus = service.assign(&fx.actor, fx.request(true)).await.unwrap();
        assert!(with_bus.is_bus_applicable);
        assert_eq!(with_bus.fee_structure.get(FeeHead::BusFirstTermAmt), d(800));
        assert_eq!(with_bus.dues.get(FeeHead::BusSecondTermAmt), d(700));
        assert_eq!(with_bus.outstanding(), d(9500));

        let without = service.assign(&fx.actor, fx.request(false)).await.unwrap();
        assert_eq!(without.id, with_bus.id);
        assert!(!without.fee_structure.has_bus());
        assert_eq!(without.outstanding(), d(8000));
    }

    #[tokio::test]
    async fn removal_in_current_year_clears_student_placement() {
        let fx = fixture().await;
        fx.define_structure().await;
        let service = fx.service(fx.archive.clone());

        service.assign(&fx.actor, fx.request(false)).await.unwrap();
        let student = fx.store.student(fx.student_id).await.unwrap();
        assert_eq!(student.current_class_id, Some(fx.class_id));
        assert_eq!(student.current_section_id, Some(fx.section_id));

        service
            .remove(&fx.actor, fx.student_id, None, Some("Left school".into()))
            .await
            .unwrap();
        let student = fx.store.student(fx.student_id).await.unwrap();
        assert_eq!(student.current_class_id, None);
        assert_eq!(student.current_section_id, None);
        assert_eq!(fx.archive.records().await.len(), 1);
    }

    #[tokio::test]
    async fn payment_racing_removal_keeps_record_and_drops_archive() {
        let fx = fixture().await;
        fx.define_structure().await;
        let racing = Arc::new(PaymentDuringArchive {
            inner: fx.archive.clone(),
            store: fx.store.clone(),
        });
        let service = fx.service(racing);

        let record = service.assign(&fx.actor, fx.request(false)).await.unwrap();
        let err = service.remove(&fx.actor, fx.student_id, None, None).await.unwrap_err();
        assert!(matches!(err, FeeError::Conflict(_)));

        assert!(fx.archive.records().await.is_empty());
        let kept = fx.store.get_record(fx.actor.school_id, record.id).await.unwrap().unwrap();
        assert_eq!(kept.paid_total(), d(1000));
        let student = fx.store.student(fx.student_id).await.unwrap();
        assert_eq!(student.current_class_id, Some(fx.class_id));
    }
}
