use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::concession_service::ProofUpload;
use super::ledger_service::LedgerService;
use super::{load_school, resolve_academic_year};
use crate::auth::Actor;
use crate::collaborators::{record_best_effort, AuditAction, AuditEvent, AuditSink, ObjectStorage};
use crate::database::store::FeeStore;
use crate::fees::{FeeError, FeeResult, NumberSeries, PaymentMode};
use crate::ledger::{Expense, LedgerReference, NewExpense};

const MODULE: &str = "expense";

#[derive(Debug, Clone)]
pub struct RecordExpenseRequest {
    pub academic_year: Option<String>,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub payment_mode: PaymentMode,
    pub expense_date: Option<NaiveDate>,
    pub bill: Option<ProofUpload>,
}

/// School spending, each expense mirrored as a DEBIT in the ledger.
#[derive(Clone)]
pub struct ExpenseService {
    store: Arc<dyn FeeStore>,
    storage: Arc<dyn ObjectStorage>,
    audit: Arc<dyn AuditSink>,
    ledger: LedgerService,
    prefix: String,
}

impl ExpenseService {
    pub fn new(
        store: Arc<dyn FeeStore>,
        storage: Arc<dyn ObjectStorage>,
        audit: Arc<dyn AuditSink>,
        ledger: LedgerService,
        prefix: String,
    ) -> Self {
        Self {
            store,
            storage,
            audit,
            ledger,
            prefix,
        }
    }

    pub async fn record_expense(&self, actor: &Actor, request: RecordExpenseRequest) -> FeeResult<Expense> {
        let school = load_school(self.store.as_ref(), actor.school_id).await?;
        let academic_year = resolve_academic_year(&school, request.academic_year)?;

        let mut draft = NewExpense {
            school_id: actor.school_id,
            academic_year,
            amount: request.amount,
            category: request.category,
            description: request.description,
            payment_mode: request.payment_mode,
            expense_date: request.expense_date.unwrap_or_else(|| Utc::now().date_naive()),
            bill_ref: None,
            created_by: actor.user_id,
        };
        draft.validate()?;

        if let Some(bill) = request.bill {
            let stored = self
                .storage
                .store(bill.bytes, &bill.mime)
                .await
                .map_err(|e| FeeError::dependency(format!("Bill upload failed: {}", e)))?;
            draft.bill_ref = Some(stored.key);
        }

        let series = NumberSeries::new(self.prefix.clone(), Utc::now().year());
        let expense = self.store.insert_expense(draft, &series).await?;
        info!(expense = %expense.expense_no, amount = %expense.amount, category = %expense.category, "Expense recorded");

        if let Err(e) = self.ledger.create_ledger_entry(actor, expense.ledger_entry()).await {
            error!(expense = %expense.expense_no, "Ledger mirror failed for expense: {}", e);
        }

        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Create,
                MODULE,
                Some(expense.id),
                format!("Recorded expense {} of {} ({})", expense.expense_no, expense.amount, expense.category),
            ),
        )
        .await;
        Ok(expense)
    }

    pub async fn cancel_expense(&self, actor: &Actor, expense_id: Uuid, reason: &str) -> FeeResult<Expense> {
        if reason.trim().is_empty() {
            return Err(FeeError::validation("A cancellation reason is required"));
        }
        let expense = self
            .store
            .cancel_expense(actor.school_id, expense_id, actor.user_id, reason.trim(), Utc::now())
            .await?;

        match self
            .store
            .find_active_ledger_entry(actor.school_id, LedgerReference::Expense(expense.id))
            .await
        {
            Ok(Some(entry)) => {
                if let Err(e) = self.ledger.cancel_ledger_entry(actor, entry.id, reason).await {
                    error!(expense = %expense.expense_no, "Failed to cancel ledger entry: {}", e);
                }
            }
            Ok(None) => warn!(expense = %expense.expense_no, "No active ledger entry to cancel"),
            Err(e) => error!(expense = %expense.expense_no, "Ledger lookup failed: {}", e),
        }

        info!(expense = %expense.expense_no, "Expense cancelled");
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Cancel,
                MODULE,
                Some(expense.id),
                format!("Cancelled expense {}: {}", expense.expense_no, reason.trim()),
            ),
        )
        .await;
        Ok(expense)
    }

    pub async fn get_expense(&self, school_id: Uuid, expense_id: Uuid) -> FeeResult<Expense> {
        self.store
            .get_expense(school_id, expense_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Expense not found"))
    }

    pub async fn list_expenses(&self, school_id: Uuid, academic_year: Option<&str>) -> FeeResult<Vec<Expense>> {
        Ok(self.store.list_expenses(school_id, academic_year).await?)
    }
}
