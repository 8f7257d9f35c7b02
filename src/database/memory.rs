use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::models::{School, SchoolClass, Section, Student};
use crate::database::store::{
    FeeStore, Page, RecordFilter, StoreError, StoreResult, TransactionFilter,
};
use crate::fees::{
    FeeStructure, FeeTransaction, NewFeeTransaction, NumberSeries, StudentRecord,
    TransactionReversal,
};
use crate::ledger::{Expense, LedgerEntry, LedgerFilter, LedgerReference, NewExpense};

#[derive(Default)]
struct MemoryState {
    schools: HashMap<Uuid, School>,
    classes: HashMap<Uuid, SchoolClass>,
    sections: HashMap<Uuid, Section>,
    students: HashMap<Uuid, Student>,
    structures: HashMap<(Uuid, Uuid), FeeStructure>,
    records: HashMap<Uuid, StudentRecord>,
    transactions: Vec<FeeTransaction>,
    ledger: Vec<LedgerEntry>,
    expenses: Vec<Expense>,
    counters: HashMap<NumberSeries, i64>,
}

impl MemoryState {
    fn next_in_series(&mut self, series: &NumberSeries) -> String {
        let value = self.counters.entry(series.clone()).or_insert(0);
        *value += 1;
        series.format(*value)
    }

    /// Replace a record after checking the version the caller read
    fn swap_record(&mut self, mut record: StudentRecord, expected_version: i64) -> StoreResult<StudentRecord> {
        let current = self
            .records
            .get(&record.id)
            .filter(|r| r.school_id == record.school_id)
            .ok_or_else(|| StoreError::NotFound(format!("Student record {} not found", record.id)))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(
                "Student record was modified concurrently; retry the request".to_string(),
            ));
        }
        record.version = expected_version + 1;
        record.updated_at = Utc::now();
        self.records.insert(record.id, record.clone());
        Ok(record)
    }
}

/// `FeeStore` held entirely in process memory.
///
/// One lock guards all state, so every trait method is atomic with respect
/// to every other. Used by the test suite and by `serve --memory`.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    ledger_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_school(&self, school: School) {
        self.state.write().await.schools.insert(school.id, school);
    }

    pub async fn add_class(&self, class: SchoolClass) {
        self.state.write().await.classes.insert(class.id, class);
    }

    pub async fn add_section(&self, section: Section) {
        self.state.write().await.sections.insert(section.id, section);
    }

    pub async fn add_student(&self, student: Student) {
        self.state.write().await.students.insert(student.id, student);
    }

    pub async fn student(&self, student_id: Uuid) -> Option<Student> {
        self.state.read().await.students.get(&student_id).cloned()
    }

    pub async fn set_current_academic_year(&self, school_id: Uuid, year: Option<String>) {
        if let Some(school) = self.state.write().await.schools.get_mut(&school_id) {
            school.current_academic_year = year;
        }
    }

    /// Make ledger inserts fail, simulating an unavailable ledger table
    pub fn set_ledger_unavailable(&self, unavailable: bool) {
        self.ledger_unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeeStore for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_school(&self, school_id: Uuid) -> StoreResult<Option<School>> {
        Ok(self.state.read().await.schools.get(&school_id).cloned())
    }

    async fn get_class(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<SchoolClass>> {
        Ok(self
            .state
            .read()
            .await
            .classes
            .get(&class_id)
            .filter(|c| c.school_id == school_id)
            .cloned())
    }

    async fn get_section(&self, school_id: Uuid, section_id: Uuid) -> StoreResult<Option<Section>> {
        Ok(self
            .state
            .read()
            .await
            .sections
            .get(&section_id)
            .filter(|s| s.school_id == school_id)
            .cloned())
    }

    async fn set_student_placement(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        class_id: Option<Uuid>,
        section_id: Option<Uuid>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let student = state
            .students
            .get_mut(&student_id)
            .filter(|s| s.school_id == school_id)
            .ok_or_else(|| StoreError::NotFound(format!("Student {} not found", student_id)))?;
        student.current_class_id = class_id;
        student.current_section_id = section_id;
        Ok(())
    }

    async fn upsert_fee_structure(&self, mut structure: FeeStructure) -> StoreResult<FeeStructure> {
        let mut state = self.state.write().await;
        let key = (structure.school_id, structure.class_id);
        if let Some(existing) = state.structures.get(&key) {
            structure.id = existing.id;
            structure.created_at = existing.created_at;
        }
        structure.updated_at = Utc::now();
        state.structures.insert(key, structure.clone());
        Ok(structure)
    }

    async fn get_fee_structure(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<FeeStructure>> {
        Ok(self.state.read().await.structures.get(&(school_id, class_id)).cloned())
    }

    async fn list_fee_structures(&self, school_id: Uuid) -> StoreResult<Vec<FeeStructure>> {
        let state = self.state.read().await;
        let mut out: Vec<FeeStructure> = state
            .structures
            .values()
            .filter(|s| s.school_id == school_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn find_record(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        academic_year: &str,
    ) -> StoreResult<Option<StudentRecord>> {
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .find(|r| {
                r.school_id == school_id && r.student_id == student_id && r.academic_year == academic_year
            })
            .cloned())
    }

    async fn get_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<Option<StudentRecord>> {
        Ok(self
            .state
            .read()
            .await
            .records
            .get(&record_id)
            .filter(|r| r.school_id == school_id)
            .cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> StoreResult<Vec<StudentRecord>> {
        let state = self.state.read().await;
        let mut out: Vec<StudentRecord> =
            state.records.values().filter(|r| filter.matches(r)).cloned().collect();
        out.sort_by(|a, b| {
            a.class_name_snapshot
                .cmp(&b.class_name_snapshot)
                .then_with(|| a.section_name_snapshot.cmp(&b.section_name_snapshot))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn upsert_unpaid_record(&self, mut record: StudentRecord) -> StoreResult<StudentRecord> {
        let mut state = self.state.write().await;
        let existing = state
            .records
            .values()
            .find(|r| {
                r.school_id == record.school_id
                    && r.student_id == record.student_id
                    && r.academic_year == record.academic_year
            })
            .cloned();

        let now = Utc::now();
        match existing {
            Some(current) => {
                if current.has_payments() {
                    return Err(StoreError::Conflict(format!(
                        "Fees of {} already paid; enrollment is locked",
                        current.paid_total()
                    )));
                }
                record.id = current.id;
                record.created_at = current.created_at;
                record.version = current.version + 1;
            }
            None => {
                record.version = 1;
                record.created_at = now;
            }
        }
        record.updated_at = now;
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_record(&self, record: StudentRecord, expected_version: i64) -> StoreResult<StudentRecord> {
        self.state.write().await.swap_record(record, expected_version)
    }

    async fn delete_unpaid_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get(&record_id)
            .filter(|r| r.school_id == school_id)
            .ok_or_else(|| StoreError::NotFound(format!("Student record {} not found", record_id)))?;
        if record.has_payments() {
            return Err(StoreError::Conflict(format!(
                "Fees of {} already paid; enrollment is locked",
                record.paid_total()
            )));
        }
        state.records.remove(&record_id);
        Ok(())
    }

    async fn commit_collection(
        &self,
        record: StudentRecord,
        expected_version: i64,
        draft: NewFeeTransaction,
        series: &NumberSeries,
    ) -> StoreResult<(StudentRecord, FeeTransaction)> {
        let mut state = self.state.write().await;
        let saved = state.swap_record(record, expected_version)?;
        let receipt_no = state.next_in_series(series);
        let txn = draft.into_transaction(receipt_no, Utc::now());
        state.transactions.push(txn.clone());
        Ok((saved, txn))
    }

    async fn commit_reversal(
        &self,
        record: StudentRecord,
        expected_version: i64,
        reversal: &TransactionReversal,
    ) -> StoreResult<(StudentRecord, FeeTransaction)> {
        let mut state = self.state.write().await;
        let index = state
            .transactions
            .iter()
            .position(|t| t.id == reversal.transaction_id && t.school_id == record.school_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("Transaction {} not found", reversal.transaction_id))
            })?;

        let mut txn = state.transactions[index].clone();
        txn.apply_reversal(reversal)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let saved = state.swap_record(record, expected_version)?;
        state.transactions[index] = txn.clone();
        Ok((saved, txn))
    }

    async fn get_transaction(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<FeeTransaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .find(|t| t.id == id && t.school_id == school_id)
            .cloned())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Page<FeeTransaction>> {
        let state = self.state.read().await;
        let matching: Vec<FeeTransaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        Ok(Page::slice(matching, filter.page))
    }

    async fn transactions_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<FeeTransaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.school_id == school_id && t.academic_year == academic_year)
            .cloned()
            .collect())
    }

    async fn insert_ledger_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        if self.ledger_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.write().await;
        let duplicate = state
            .ledger
            .iter()
            .any(|e| e.is_active() && e.reference == entry.reference);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "An active ledger entry already mirrors {} {}",
                entry.reference.model(),
                entry.reference.id()
            )));
        }
        state.ledger.push(entry.clone());
        Ok(entry)
    }

    async fn get_ledger_entry(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .ledger
            .iter()
            .find(|e| e.id == id && e.school_id == school_id)
            .cloned())
    }

    async fn find_active_ledger_entry(
        &self,
        school_id: Uuid,
        reference: LedgerReference,
    ) -> StoreResult<Option<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .ledger
            .iter()
            .find(|e| e.school_id == school_id && e.reference == reference && e.is_active())
            .cloned())
    }

    async fn cancel_ledger_entry(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<LedgerEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .ledger
            .iter_mut()
            .find(|e| e.id == id && e.school_id == school_id)
            .ok_or_else(|| StoreError::NotFound(format!("Ledger entry {} not found", id)))?;
        entry
            .cancel(cancelled_by, reason, at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(entry.clone())
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> StoreResult<Page<LedgerEntry>> {
        let state = self.state.read().await;
        let mut matching: Vec<LedgerEntry> =
            state.ledger.iter().filter(|e| filter.matches(e)).cloned().collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_at.cmp(&a.created_at)));
        Ok(Page::slice(matching, filter.page))
    }

    async fn ledger_entries_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .ledger
            .iter()
            .filter(|e| e.school_id == school_id && e.academic_year == academic_year)
            .cloned()
            .collect())
    }

    async fn insert_expense(&self, draft: NewExpense, series: &NumberSeries) -> StoreResult<Expense> {
        let mut state = self.state.write().await;
        let expense_no = state.next_in_series(series);
        let expense = draft.into_expense(expense_no, Utc::now());
        state.expenses.push(expense.clone());
        Ok(expense)
    }

    async fn get_expense(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>> {
        Ok(self
            .state
            .read()
            .await
            .expenses
            .iter()
            .find(|e| e.id == id && e.school_id == school_id)
            .cloned())
    }

    async fn cancel_expense(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Expense> {
        let mut state = self.state.write().await;
        let expense = state
            .expenses
            .iter_mut()
            .find(|e| e.id == id && e.school_id == school_id)
            .ok_or_else(|| StoreError::NotFound(format!("Expense {} not found", id)))?;
        expense
            .cancel(cancelled_by, reason, at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(expense.clone())
    }

    async fn list_expenses(&self, school_id: Uuid, academic_year: Option<&str>) -> StoreResult<Vec<Expense>> {
        let state = self.state.read().await;
        let mut out: Vec<Expense> = state
            .expenses
            .iter()
            .filter(|e| e.school_id == school_id)
            .filter(|e| academic_year.map_or(true, |y| e.academic_year == y))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.expense_date.cmp(&a.expense_date));
        Ok(out)
    }
}
