//! Fee core operations. Every service takes the caller's `Actor`; its
//! school scopes every read and write, its user id lands in audit and
//! collector fields.

pub mod collection_service;
pub mod concession_service;
pub mod enrollment_service;
pub mod expense_service;
pub mod fee_structure_service;
pub mod ledger_service;

pub use collection_service::{CancelTransactionRequest, CollectFeeRequest, CollectionOutcome, CollectionService};
pub use concession_service::{ApplyConcessionRequest, ConcessionService, ProofUpload};
pub use enrollment_service::{AssignRequest, EnrollmentService};
pub use expense_service::{ExpenseService, RecordExpenseRequest};
pub use fee_structure_service::FeeStructureService;
pub use ledger_service::{BackfillReport, LedgerService};

use uuid::Uuid;

use crate::database::models::School;
use crate::database::store::FeeStore;
use crate::fees::{FeeError, FeeResult};

pub(crate) async fn load_school(store: &dyn FeeStore, school_id: Uuid) -> FeeResult<School> {
    store
        .get_school(school_id)
        .await?
        .ok_or_else(|| FeeError::not_found("School not found"))
}

/// Explicit year wins; otherwise the school's current academic year
pub(crate) fn resolve_academic_year(school: &School, requested: Option<String>) -> FeeResult<String> {
    requested
        .map(|y| y.trim().to_string())
        .filter(|y| !y.is_empty())
        .or_else(|| school.current_academic_year.clone())
        .ok_or_else(|| {
            FeeError::validation("Academic year is required: none given and the school has no current year")
        })
}
