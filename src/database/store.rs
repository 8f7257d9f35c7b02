use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{School, SchoolClass, Section};
use crate::fees::{
    FeeStructure, FeeTransaction, NewFeeTransaction, NumberSeries, PaymentMode, StudentRecord,
    TransactionReversal, TransactionStatus,
};
use crate::ledger::{Expense, LedgerEntry, LedgerFilter, LedgerReference, NewExpense};

/// Errors from a `FeeStore` backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write lost its predicate (version moved, payment landed,
    /// status already flipped, unique key taken)
    #[error("{0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl PageRequest {
    /// Page numbers start at 1; limit is clamped to `1..=max_limit`
    pub fn new(page: Option<u32>, limit: Option<u32>, max_limit: u32) -> Self {
        let defaults = Self::default();
        Self {
            page: page.unwrap_or(defaults.page).max(1),
            limit: limit.unwrap_or(defaults.limit).clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Cut one page out of an already filtered and ordered list
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit as usize)
            .collect();
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordFilter {
    pub school_id: Uuid,
    pub academic_year: Option<String>,
    pub class_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
}

impl RecordFilter {
    pub fn matches(&self, record: &StudentRecord) -> bool {
        record.school_id == self.school_id
            && self.academic_year.as_ref().map_or(true, |y| &record.academic_year == y)
            && self.class_id.map_or(true, |c| record.class_id == c)
            && self.section_id.map_or(true, |s| record.section_id == s)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub school_id: Uuid,
    pub academic_year: Option<String>,
    pub student_id: Option<Uuid>,
    pub record_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub payment_mode: Option<PaymentMode>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub page: PageRequest,
}

impl TransactionFilter {
    pub fn for_school(school_id: Uuid) -> Self {
        Self {
            school_id,
            academic_year: None,
            student_id: None,
            record_id: None,
            status: None,
            payment_mode: None,
            from_date: None,
            to_date: None,
            page: PageRequest::default(),
        }
    }

    pub fn matches(&self, txn: &FeeTransaction) -> bool {
        txn.school_id == self.school_id
            && self.academic_year.as_ref().map_or(true, |y| &txn.academic_year == y)
            && self.student_id.map_or(true, |s| txn.student_id == s)
            && self.record_id.map_or(true, |r| txn.record_id == r)
            && self.status.map_or(true, |s| txn.status == s)
            && self.payment_mode.map_or(true, |m| txn.payment_mode == m)
            && self.from_date.map_or(true, |d| txn.payment_date >= d)
            && self.to_date.map_or(true, |d| txn.payment_date <= d)
    }
}

/// Persistence for the fee core. Every method is scoped by `school_id`
/// except the number counters, which are global per series.
///
/// Methods that mutate a record take the version the caller read and must
/// fail with `StoreError::Conflict` if it moved; returned records carry the
/// bumped version.
#[async_trait]
pub trait FeeStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // School directory (read side)
    async fn get_school(&self, school_id: Uuid) -> StoreResult<Option<School>>;
    async fn get_class(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<SchoolClass>>;
    async fn get_section(&self, school_id: Uuid, section_id: Uuid) -> StoreResult<Option<Section>>;
    async fn set_student_placement(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        class_id: Option<Uuid>,
        section_id: Option<Uuid>,
    ) -> StoreResult<()>;

    // Fee structures
    async fn upsert_fee_structure(&self, structure: FeeStructure) -> StoreResult<FeeStructure>;
    async fn get_fee_structure(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<FeeStructure>>;
    async fn list_fee_structures(&self, school_id: Uuid) -> StoreResult<Vec<FeeStructure>>;

    // Enrollment records
    async fn find_record(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        academic_year: &str,
    ) -> StoreResult<Option<StudentRecord>>;
    async fn get_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<Option<StudentRecord>>;
    async fn list_records(&self, filter: &RecordFilter) -> StoreResult<Vec<StudentRecord>>;

    /// Insert the record, or replace the one already held for the same
    /// (school, student, year) provided it still has nothing paid.
    async fn upsert_unpaid_record(&self, record: StudentRecord) -> StoreResult<StudentRecord>;

    async fn update_record(&self, record: StudentRecord, expected_version: i64) -> StoreResult<StudentRecord>;

    /// Delete only while nothing is paid against the record
    async fn delete_unpaid_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<()>;

    // Receipts
    /// Persist the updated record and the receipt as one unit, drawing the
    /// receipt number from `series` inside that unit.
    async fn commit_collection(
        &self,
        record: StudentRecord,
        expected_version: i64,
        draft: NewFeeTransaction,
        series: &NumberSeries,
    ) -> StoreResult<(StudentRecord, FeeTransaction)>;

    /// Persist the reversed record and flip the receipt status as one unit.
    /// Conflict if the receipt is no longer `success`.
    async fn commit_reversal(
        &self,
        record: StudentRecord,
        expected_version: i64,
        reversal: &TransactionReversal,
    ) -> StoreResult<(StudentRecord, FeeTransaction)>;

    async fn get_transaction(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<FeeTransaction>>;
    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Page<FeeTransaction>>;
    async fn transactions_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<FeeTransaction>>;

    // Ledger
    /// Conflict if an active entry already mirrors the same reference
    async fn insert_ledger_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry>;
    async fn get_ledger_entry(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<LedgerEntry>>;
    async fn find_active_ledger_entry(
        &self,
        school_id: Uuid,
        reference: LedgerReference,
    ) -> StoreResult<Option<LedgerEntry>>;
    async fn cancel_ledger_entry(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<LedgerEntry>;
    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> StoreResult<Page<LedgerEntry>>;
    async fn ledger_entries_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<LedgerEntry>>;

    // Expenses
    async fn insert_expense(&self, draft: NewExpense, series: &NumberSeries) -> StoreResult<Expense>;
    async fn get_expense(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>>;
    async fn cancel_expense(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Expense>;
    async fn list_expenses(&self, school_id: Uuid, academic_year: Option<&str>) -> StoreResult<Vec<Expense>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps() {
        let req = PageRequest::new(Some(0), Some(5000), 100);
        assert_eq!(req, PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(Some(3), Some(10), 100).offset(), 20);
    }

    #[test]
    fn slices_pages() {
        let page = Page::slice((1..=45).collect::<Vec<_>>(), PageRequest { page: 3, limit: 20 });
        assert_eq!(page.items, vec![41, 42, 43, 44, 45]);
        assert_eq!(page.total, 45);
    }
}
