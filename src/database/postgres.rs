use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::models::{School, SchoolClass, Section};
use crate::database::store::{
    FeeStore, Page, RecordFilter, StoreError, StoreResult, TransactionFilter,
};
use crate::fees::{
    AllocationLine, CashDenomination, Concession, FeeHeads, FeeStructure, FeeTransaction,
    NewFeeTransaction, NumberSeries, StudentRecord, TransactionReversal,
};
use crate::ledger::{Expense, LedgerEntry, LedgerFilter, LedgerReference, NewExpense};

const STRUCTURE_COLUMNS: &str =
    "id, school_id, class_id, fee_head, total_amount, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, school_id, student_id, academic_year, class_id, section_id, \
     class_name_snapshot, section_name_snapshot, new_old, roll_number, fee_structure, fee_paid, \
     dues, concession, is_active, is_bus_applicable, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, school_id, student_id, record_id, academic_year, receipt_no, \
     payment_date, payment_mode, amount_paid, allocation, cash_denominations, reference_number, \
     remark, collected_by, status, cancel_reason, cancelled_by, cancelled_at, created_at";

const LEDGER_COLUMNS: &str = "id, school_id, academic_year, transaction_type, amount, date, \
     reference_model, reference_id, student_record_id, section_id, payment_mode, category, \
     description, status, created_by, cancelled_by, cancel_reason, cancelled_at, created_at";

const EXPENSE_COLUMNS: &str = "id, school_id, academic_year, expense_no, amount, category, \
     description, payment_mode, expense_date, bill_ref, status, created_by, cancelled_by, \
     cancel_reason, cancelled_at, created_at";

fn parse_column<T>(value: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(StoreError::Corrupt)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[derive(FromRow)]
struct StructureRow {
    id: Uuid,
    school_id: Uuid,
    class_id: Uuid,
    fee_head: Json<FeeHeads>,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StructureRow> for FeeStructure {
    fn from(row: StructureRow) -> Self {
        FeeStructure {
            id: row.id,
            school_id: row.school_id,
            class_id: row.class_id,
            fee_head: row.fee_head.0,
            total_amount: row.total_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: Uuid,
    school_id: Uuid,
    student_id: Uuid,
    academic_year: String,
    class_id: Uuid,
    section_id: Uuid,
    class_name_snapshot: String,
    section_name_snapshot: String,
    new_old: String,
    roll_number: Option<String>,
    fee_structure: Json<FeeHeads>,
    fee_paid: Json<FeeHeads>,
    dues: Json<FeeHeads>,
    concession: Json<Concession>,
    is_active: bool,
    is_bus_applicable: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for StudentRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> StoreResult<Self> {
        Ok(StudentRecord {
            id: row.id,
            school_id: row.school_id,
            student_id: row.student_id,
            academic_year: row.academic_year,
            class_id: row.class_id,
            section_id: row.section_id,
            class_name_snapshot: row.class_name_snapshot,
            section_name_snapshot: row.section_name_snapshot,
            new_old: parse_column(&row.new_old)?,
            roll_number: row.roll_number,
            fee_structure: row.fee_structure.0,
            fee_paid: row.fee_paid.0,
            dues: row.dues.0,
            concession: row.concession.0,
            is_active: row.is_active,
            is_bus_applicable: row.is_bus_applicable,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    school_id: Uuid,
    student_id: Uuid,
    record_id: Uuid,
    academic_year: String,
    receipt_no: String,
    payment_date: NaiveDate,
    payment_mode: String,
    amount_paid: Decimal,
    allocation: Json<Vec<AllocationLine>>,
    cash_denominations: Json<Vec<CashDenomination>>,
    reference_number: Option<String>,
    remark: Option<String>,
    collected_by: Uuid,
    status: String,
    cancel_reason: Option<String>,
    cancelled_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for FeeTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> StoreResult<Self> {
        Ok(FeeTransaction {
            id: row.id,
            school_id: row.school_id,
            student_id: row.student_id,
            record_id: row.record_id,
            academic_year: row.academic_year,
            receipt_no: row.receipt_no,
            payment_date: row.payment_date,
            payment_mode: parse_column(&row.payment_mode)?,
            amount_paid: row.amount_paid,
            allocation: row.allocation.0,
            cash_denominations: row.cash_denominations.0,
            reference_number: row.reference_number,
            remark: row.remark,
            collected_by: row.collected_by,
            status: parse_column(&row.status)?,
            cancel_reason: row.cancel_reason,
            cancelled_by: row.cancelled_by,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerRow {
    id: Uuid,
    school_id: Uuid,
    academic_year: String,
    transaction_type: String,
    amount: Decimal,
    date: NaiveDate,
    reference_model: String,
    reference_id: Uuid,
    student_record_id: Option<Uuid>,
    section_id: Option<Uuid>,
    payment_mode: Option<String>,
    category: String,
    description: Option<String>,
    status: String,
    created_by: Uuid,
    cancelled_by: Option<Uuid>,
    cancel_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> StoreResult<Self> {
        Ok(LedgerEntry {
            id: row.id,
            school_id: row.school_id,
            academic_year: row.academic_year,
            transaction_type: parse_column(&row.transaction_type)?,
            amount: row.amount,
            date: row.date,
            reference: LedgerReference::from_parts(&row.reference_model, row.reference_id)
                .map_err(StoreError::Corrupt)?,
            student_record_id: row.student_record_id,
            section_id: row.section_id,
            payment_mode: row.payment_mode.as_deref().map(parse_column).transpose()?,
            category: row.category,
            description: row.description,
            status: parse_column(&row.status)?,
            created_by: row.created_by,
            cancelled_by: row.cancelled_by,
            cancel_reason: row.cancel_reason,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExpenseRow {
    id: Uuid,
    school_id: Uuid,
    academic_year: String,
    expense_no: String,
    amount: Decimal,
    category: String,
    description: Option<String>,
    payment_mode: String,
    expense_date: NaiveDate,
    bill_ref: Option<String>,
    status: String,
    created_by: Uuid,
    cancelled_by: Option<Uuid>,
    cancel_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = StoreError;

    fn try_from(row: ExpenseRow) -> StoreResult<Self> {
        Ok(Expense {
            id: row.id,
            school_id: row.school_id,
            academic_year: row.academic_year,
            expense_no: row.expense_no,
            amount: row.amount,
            category: row.category,
            description: row.description,
            payment_mode: parse_column(&row.payment_mode)?,
            expense_date: row.expense_date,
            bill_ref: row.bill_ref,
            status: parse_column(&row.status)?,
            created_by: row.created_by,
            cancelled_by: row.cancelled_by,
            cancel_reason: row.cancel_reason,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// `FeeStore` backed by Postgres.
///
/// Every multi-row change runs in one database transaction; record writes are
/// conditioned on the version the caller read.
#[derive(Clone)]
pub struct PgFeeStore {
    pool: PgPool,
}

impl PgFeeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn next_in_series(conn: &mut PgConnection, series: &NumberSeries) -> StoreResult<String> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO counters (name, year, value) VALUES ($1, $2, 1) \
             ON CONFLICT (name, year) DO UPDATE SET value = counters.value + 1 \
             RETURNING value",
        )
        .bind(&series.prefix)
        .bind(series.year)
        .fetch_one(conn)
        .await?;
        Ok(series.format(value))
    }

    async fn swap_record(
        conn: &mut PgConnection,
        record: &StudentRecord,
        expected_version: i64,
    ) -> StoreResult<StudentRecord> {
        let sql = format!(
            "UPDATE student_records SET class_id = $3, section_id = $4, class_name_snapshot = $5, \
             section_name_snapshot = $6, new_old = $7, roll_number = $8, fee_structure = $9, \
             fee_paid = $10, dues = $11, concession = $12, paid_total = $13, is_active = $14, \
             is_bus_applicable = $15, version = version + 1, updated_at = now() \
             WHERE id = $1 AND school_id = $2 AND version = $16 RETURNING {}",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(record.id)
            .bind(record.school_id)
            .bind(record.class_id)
            .bind(record.section_id)
            .bind(&record.class_name_snapshot)
            .bind(&record.section_name_snapshot)
            .bind(record.new_old.as_str())
            .bind(&record.roll_number)
            .bind(Json(record.fee_structure))
            .bind(Json(record.fee_paid))
            .bind(Json(record.dues))
            .bind(Json(record.concession.clone()))
            .bind(record.paid_total())
            .bind(record.is_active)
            .bind(record.is_bus_applicable)
            .bind(expected_version)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let exists: Option<i64> = sqlx::query_scalar(
                    "SELECT version FROM student_records WHERE id = $1 AND school_id = $2",
                )
                .bind(record.id)
                .bind(record.school_id)
                .fetch_optional(&mut *conn)
                .await?;
                Err(match exists {
                    Some(_) => StoreError::Conflict(
                        "Student record was modified concurrently; retry the request".to_string(),
                    ),
                    None => StoreError::NotFound(format!("Student record {} not found", record.id)),
                })
            }
        }
    }

    async fn insert_transaction(conn: &mut PgConnection, txn: &FeeTransaction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO fee_transactions (id, school_id, student_id, record_id, academic_year, \
             receipt_no, payment_date, payment_mode, amount_paid, allocation, cash_denominations, \
             reference_number, remark, collected_by, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(txn.id)
        .bind(txn.school_id)
        .bind(txn.student_id)
        .bind(txn.record_id)
        .bind(&txn.academic_year)
        .bind(&txn.receipt_no)
        .bind(txn.payment_date)
        .bind(txn.payment_mode.as_str())
        .bind(txn.amount_paid)
        .bind(Json(&txn.allocation))
        .bind(Json(&txn.cash_denominations))
        .bind(&txn.reference_number)
        .bind(&txn.remark)
        .bind(txn.collected_by)
        .bind(txn.status.as_str())
        .bind(txn.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("Receipt number {} already issued", txn.receipt_no))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn record_exists(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<bool> {
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM student_records WHERE id = $1 AND school_id = $2")
                .bind(record_id)
                .bind(school_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

fn push_transaction_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    qb.push(" WHERE school_id = ").push_bind(filter.school_id);
    if let Some(year) = &filter.academic_year {
        qb.push(" AND academic_year = ").push_bind(year.clone());
    }
    if let Some(student_id) = filter.student_id {
        qb.push(" AND student_id = ").push_bind(student_id);
    }
    if let Some(record_id) = filter.record_id {
        qb.push(" AND record_id = ").push_bind(record_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(mode) = filter.payment_mode {
        qb.push(" AND payment_mode = ").push_bind(mode.as_str());
    }
    if let Some(from) = filter.from_date {
        qb.push(" AND payment_date >= ").push_bind(from);
    }
    if let Some(to) = filter.to_date {
        qb.push(" AND payment_date <= ").push_bind(to);
    }
}

fn push_ledger_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &LedgerFilter) {
    qb.push(" WHERE school_id = ").push_bind(filter.school_id);
    if let Some(year) = &filter.academic_year {
        qb.push(" AND academic_year = ").push_bind(year.clone());
    }
    if let Some(kind) = filter.transaction_type {
        qb.push(" AND transaction_type = ").push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(mode) = filter.payment_mode {
        qb.push(" AND payment_mode = ").push_bind(mode.as_str());
    }
    if let Some(section_id) = filter.section_id {
        qb.push(" AND section_id = ").push_bind(section_id);
    }
    if let Some(from) = filter.from_date {
        qb.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.to_date {
        qb.push(" AND date <= ").push_bind(to);
    }
}

#[async_trait]
impl FeeStore for PgFeeStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_school(&self, school_id: Uuid) -> StoreResult<Option<School>> {
        Ok(sqlx::query_as(
            "SELECT id, name, current_academic_year, created_at FROM schools WHERE id = $1",
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_class(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<SchoolClass>> {
        Ok(
            sqlx::query_as("SELECT id, school_id, name FROM classes WHERE id = $1 AND school_id = $2")
                .bind(class_id)
                .bind(school_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn get_section(&self, school_id: Uuid, section_id: Uuid) -> StoreResult<Option<Section>> {
        Ok(sqlx::query_as(
            "SELECT id, school_id, class_id, name FROM sections WHERE id = $1 AND school_id = $2",
        )
        .bind(section_id)
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_student_placement(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        class_id: Option<Uuid>,
        section_id: Option<Uuid>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE students SET current_class_id = $3, current_section_id = $4 \
             WHERE id = $1 AND school_id = $2",
        )
        .bind(student_id)
        .bind(school_id)
        .bind(class_id)
        .bind(section_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Student {} not found", student_id)));
        }
        Ok(())
    }

    async fn upsert_fee_structure(&self, structure: FeeStructure) -> StoreResult<FeeStructure> {
        let sql = format!(
            "INSERT INTO fee_structures (id, school_id, class_id, fee_head, total_amount, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now(), now()) \
             ON CONFLICT (school_id, class_id) DO UPDATE \
             SET fee_head = EXCLUDED.fee_head, total_amount = EXCLUDED.total_amount, updated_at = now() \
             RETURNING {}",
            STRUCTURE_COLUMNS
        );
        let row: StructureRow = sqlx::query_as(&sql)
            .bind(structure.id)
            .bind(structure.school_id)
            .bind(structure.class_id)
            .bind(Json(structure.fee_head))
            .bind(structure.total_amount)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn get_fee_structure(&self, school_id: Uuid, class_id: Uuid) -> StoreResult<Option<FeeStructure>> {
        let sql = format!(
            "SELECT {} FROM fee_structures WHERE school_id = $1 AND class_id = $2",
            STRUCTURE_COLUMNS
        );
        let row: Option<StructureRow> = sqlx::query_as(&sql)
            .bind(school_id)
            .bind(class_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_fee_structures(&self, school_id: Uuid) -> StoreResult<Vec<FeeStructure>> {
        let sql = format!(
            "SELECT {} FROM fee_structures WHERE school_id = $1 ORDER BY created_at",
            STRUCTURE_COLUMNS
        );
        let rows: Vec<StructureRow> = sqlx::query_as(&sql).bind(school_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_record(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        academic_year: &str,
    ) -> StoreResult<Option<StudentRecord>> {
        let sql = format!(
            "SELECT {} FROM student_records WHERE school_id = $1 AND student_id = $2 AND academic_year = $3",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(school_id)
            .bind(student_id)
            .bind(academic_year)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<Option<StudentRecord>> {
        let sql = format!(
            "SELECT {} FROM student_records WHERE id = $1 AND school_id = $2",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(record_id)
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_records(&self, filter: &RecordFilter) -> StoreResult<Vec<StudentRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM student_records", RECORD_COLUMNS));
        qb.push(" WHERE school_id = ").push_bind(filter.school_id);
        if let Some(year) = &filter.academic_year {
            qb.push(" AND academic_year = ").push_bind(year.clone());
        }
        if let Some(class_id) = filter.class_id {
            qb.push(" AND class_id = ").push_bind(class_id);
        }
        if let Some(section_id) = filter.section_id {
            qb.push(" AND section_id = ").push_bind(section_id);
        }
        qb.push(" ORDER BY class_name_snapshot, section_name_snapshot, created_at");
        let rows: Vec<RecordRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn upsert_unpaid_record(&self, record: StudentRecord) -> StoreResult<StudentRecord> {
        let sql = format!(
            "INSERT INTO student_records (id, school_id, student_id, academic_year, class_id, section_id, \
             class_name_snapshot, section_name_snapshot, new_old, roll_number, fee_structure, fee_paid, \
             dues, concession, paid_total, is_active, is_bus_applicable, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 1, now(), now()) \
             ON CONFLICT (school_id, student_id, academic_year) DO UPDATE SET \
             class_id = EXCLUDED.class_id, section_id = EXCLUDED.section_id, \
             class_name_snapshot = EXCLUDED.class_name_snapshot, \
             section_name_snapshot = EXCLUDED.section_name_snapshot, new_old = EXCLUDED.new_old, \
             roll_number = EXCLUDED.roll_number, fee_structure = EXCLUDED.fee_structure, \
             fee_paid = EXCLUDED.fee_paid, dues = EXCLUDED.dues, concession = EXCLUDED.concession, \
             paid_total = EXCLUDED.paid_total, is_active = EXCLUDED.is_active, \
             is_bus_applicable = EXCLUDED.is_bus_applicable, \
             version = student_records.version + 1, updated_at = now() \
             WHERE student_records.paid_total = 0 \
             RETURNING {}",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(record.id)
            .bind(record.school_id)
            .bind(record.student_id)
            .bind(&record.academic_year)
            .bind(record.class_id)
            .bind(record.section_id)
            .bind(&record.class_name_snapshot)
            .bind(&record.section_name_snapshot)
            .bind(record.new_old.as_str())
            .bind(&record.roll_number)
            .bind(Json(record.fee_structure))
            .bind(Json(record.fee_paid))
            .bind(Json(record.dues))
            .bind(Json(record.concession.clone()))
            .bind(record.paid_total())
            .bind(record.is_active)
            .bind(record.is_bus_applicable)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::Conflict(format!(
                "Fees already paid for {}; enrollment is locked",
                record.academic_year
            ))),
        }
    }

    async fn update_record(&self, record: StudentRecord, expected_version: i64) -> StoreResult<StudentRecord> {
        let mut conn = self.pool.acquire().await?;
        Self::swap_record(&mut conn, &record, expected_version).await
    }

    async fn delete_unpaid_record(&self, school_id: Uuid, record_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM student_records WHERE id = $1 AND school_id = $2 AND paid_total = 0",
        )
        .bind(record_id)
        .bind(school_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.record_exists(school_id, record_id).await? {
            Err(StoreError::Conflict("Fees already paid; enrollment is locked".to_string()))
        } else {
            Err(StoreError::NotFound(format!("Student record {} not found", record_id)))
        }
    }

    async fn commit_collection(
        &self,
        record: StudentRecord,
        expected_version: i64,
        draft: NewFeeTransaction,
        series: &NumberSeries,
    ) -> StoreResult<(StudentRecord, FeeTransaction)> {
        let mut tx = self.pool.begin().await?;
        let saved = Self::swap_record(&mut tx, &record, expected_version).await?;
        let receipt_no = Self::next_in_series(&mut tx, series).await?;
        let txn = draft.into_transaction(receipt_no, Utc::now());
        Self::insert_transaction(&mut tx, &txn).await?;
        tx.commit().await?;
        Ok((saved, txn))
    }

    async fn commit_reversal(
        &self,
        record: StudentRecord,
        expected_version: i64,
        reversal: &TransactionReversal,
    ) -> StoreResult<(StudentRecord, FeeTransaction)> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM fee_transactions WHERE id = $1 AND school_id = $2 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(reversal.transaction_id)
            .bind(record.school_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut txn: FeeTransaction = row
            .ok_or_else(|| StoreError::NotFound(format!("Transaction {} not found", reversal.transaction_id)))?
            .try_into()?;
        txn.apply_reversal(reversal)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        sqlx::query(
            "UPDATE fee_transactions SET status = $3, cancel_reason = $4, cancelled_by = $5, cancelled_at = $6 \
             WHERE id = $1 AND school_id = $2",
        )
        .bind(txn.id)
        .bind(txn.school_id)
        .bind(txn.status.as_str())
        .bind(&txn.cancel_reason)
        .bind(txn.cancelled_by)
        .bind(txn.cancelled_at)
        .execute(&mut *tx)
        .await?;

        let saved = Self::swap_record(&mut tx, &record, expected_version).await?;
        tx.commit().await?;
        Ok((saved, txn))
    }

    async fn get_transaction(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<FeeTransaction>> {
        let sql = format!(
            "SELECT {} FROM fee_transactions WHERE id = $1 AND school_id = $2",
            TRANSACTION_COLUMNS
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Page<FeeTransaction>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM fee_transactions");
        push_transaction_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM fee_transactions", TRANSACTION_COLUMNS));
        push_transaction_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.page.limit))
            .push(" OFFSET ")
            .push_bind(filter.page.offset() as i64);
        let rows: Vec<TransactionRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: collect(rows)?,
            total: total.max(0) as u64,
            page: filter.page.page,
            limit: filter.page.limit,
        })
    }

    async fn transactions_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<FeeTransaction>> {
        let sql = format!(
            "SELECT {} FROM fee_transactions WHERE school_id = $1 AND academic_year = $2 ORDER BY created_at",
            TRANSACTION_COLUMNS
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(school_id)
            .bind(academic_year)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_ledger_entry(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        sqlx::query(
            "INSERT INTO ledger_entries (id, school_id, academic_year, transaction_type, amount, date, \
             reference_model, reference_id, student_record_id, section_id, payment_mode, category, \
             description, status, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(entry.id)
        .bind(entry.school_id)
        .bind(&entry.academic_year)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.date)
        .bind(entry.reference.model())
        .bind(entry.reference.id())
        .bind(entry.student_record_id)
        .bind(entry.section_id)
        .bind(entry.payment_mode.map(|m| m.as_str()))
        .bind(&entry.category)
        .bind(&entry.description)
        .bind(entry.status.as_str())
        .bind(entry.created_by)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "An active ledger entry already mirrors {} {}",
                    entry.reference.model(),
                    entry.reference.id()
                ))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(entry)
    }

    async fn get_ledger_entry(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE id = $1 AND school_id = $2",
            LEDGER_COLUMNS
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_active_ledger_entry(
        &self,
        school_id: Uuid,
        reference: LedgerReference,
    ) -> StoreResult<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE school_id = $1 AND reference_model = $2 \
             AND reference_id = $3 AND status = 'active'",
            LEDGER_COLUMNS
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(school_id)
            .bind(reference.model())
            .bind(reference.id())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn cancel_ledger_entry(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE id = $1 AND school_id = $2 FOR UPDATE",
            LEDGER_COLUMNS
        );
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut entry: LedgerEntry = row
            .ok_or_else(|| StoreError::NotFound(format!("Ledger entry {} not found", id)))?
            .try_into()?;
        entry
            .cancel(cancelled_by, reason, at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        sqlx::query(
            "UPDATE ledger_entries SET status = $3, cancelled_by = $4, cancel_reason = $5, cancelled_at = $6 \
             WHERE id = $1 AND school_id = $2",
        )
        .bind(entry.id)
        .bind(entry.school_id)
        .bind(entry.status.as_str())
        .bind(entry.cancelled_by)
        .bind(&entry.cancel_reason)
        .bind(entry.cancelled_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn list_ledger_entries(&self, filter: &LedgerFilter) -> StoreResult<Page<LedgerEntry>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ledger_entries");
        push_ledger_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM ledger_entries", LEDGER_COLUMNS));
        push_ledger_filter(&mut qb, filter);
        qb.push(" ORDER BY date DESC, created_at DESC LIMIT ")
            .push_bind(i64::from(filter.page.limit))
            .push(" OFFSET ")
            .push_bind(filter.page.offset() as i64);
        let rows: Vec<LedgerRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: collect(rows)?,
            total: total.max(0) as u64,
            page: filter.page.page,
            limit: filter.page.limit,
        })
    }

    async fn ledger_entries_for_year(&self, school_id: Uuid, academic_year: &str) -> StoreResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE school_id = $1 AND academic_year = $2 ORDER BY date, created_at",
            LEDGER_COLUMNS
        );
        let rows: Vec<LedgerRow> = sqlx::query_as(&sql)
            .bind(school_id)
            .bind(academic_year)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn insert_expense(&self, draft: NewExpense, series: &NumberSeries) -> StoreResult<Expense> {
        let mut tx = self.pool.begin().await?;
        let expense_no = Self::next_in_series(&mut tx, series).await?;
        let expense = draft.into_expense(expense_no, Utc::now());
        sqlx::query(
            "INSERT INTO expenses (id, school_id, academic_year, expense_no, amount, category, description, \
             payment_mode, expense_date, bill_ref, status, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(expense.id)
        .bind(expense.school_id)
        .bind(&expense.academic_year)
        .bind(&expense.expense_no)
        .bind(expense.amount)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(expense.payment_mode.as_str())
        .bind(expense.expense_date)
        .bind(&expense.bill_ref)
        .bind(expense.status.as_str())
        .bind(expense.created_by)
        .bind(expense.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(expense)
    }

    async fn get_expense(&self, school_id: Uuid, id: Uuid) -> StoreResult<Option<Expense>> {
        let sql = format!("SELECT {} FROM expenses WHERE id = $1 AND school_id = $2", EXPENSE_COLUMNS);
        let row: Option<ExpenseRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn cancel_expense(
        &self,
        school_id: Uuid,
        id: Uuid,
        cancelled_by: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Expense> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM expenses WHERE id = $1 AND school_id = $2 FOR UPDATE",
            EXPENSE_COLUMNS
        );
        let row: Option<ExpenseRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut expense: Expense = row
            .ok_or_else(|| StoreError::NotFound(format!("Expense {} not found", id)))?
            .try_into()?;
        expense
            .cancel(cancelled_by, reason, at)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        sqlx::query(
            "UPDATE expenses SET status = $3, cancelled_by = $4, cancel_reason = $5, cancelled_at = $6 \
             WHERE id = $1 AND school_id = $2",
        )
        .bind(expense.id)
        .bind(expense.school_id)
        .bind(expense.status.as_str())
        .bind(expense.cancelled_by)
        .bind(&expense.cancel_reason)
        .bind(expense.cancelled_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(expense)
    }

    async fn list_expenses(&self, school_id: Uuid, academic_year: Option<&str>) -> StoreResult<Vec<Expense>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM expenses", EXPENSE_COLUMNS));
        qb.push(" WHERE school_id = ").push_bind(school_id);
        if let Some(year) = academic_year {
            qb.push(" AND academic_year = ").push_bind(year.to_string());
        }
        qb.push(" ORDER BY expense_date DESC, created_at DESC");
        let rows: Vec<ExpenseRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        collect(rows)
    }
}
