use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{LedgerReference, NewLedgerEntry, TransactionType};
use crate::fees::{FeeError, FeeResult, PaymentMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Active,
    Cancelled,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Active => "active",
            ExpenseStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ExpenseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ExpenseStatus::Active),
            "cancelled" => Ok(ExpenseStatus::Cancelled),
            other => Err(format!("Unknown expense status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub school_id: Uuid,
    pub academic_year: String,
    pub expense_no: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub payment_mode: PaymentMode,
    pub expense_date: NaiveDate,
    pub bill_ref: Option<String>,
    pub status: ExpenseStatus,
    pub created_by: Uuid,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn ledger_entry(&self) -> NewLedgerEntry {
        NewLedgerEntry {
            school_id: self.school_id,
            academic_year: self.academic_year.clone(),
            transaction_type: TransactionType::Debit,
            amount: self.amount,
            date: self.expense_date,
            reference: LedgerReference::Expense(self.id),
            student_record_id: None,
            section_id: None,
            payment_mode: Some(self.payment_mode),
            category: self.category.clone(),
            description: Some(format!("Expense {}", self.expense_no)),
            created_by: self.created_by,
        }
    }

    pub fn cancel(&mut self, cancelled_by: Uuid, reason: &str, at: DateTime<Utc>) -> FeeResult<()> {
        if self.status == ExpenseStatus::Cancelled {
            return Err(FeeError::conflict(format!(
                "Expense {} is already cancelled",
                self.expense_no
            )));
        }
        self.status = ExpenseStatus::Cancelled;
        self.cancelled_by = Some(cancelled_by);
        self.cancel_reason = Some(reason.to_string());
        self.cancelled_at = Some(at);
        Ok(())
    }
}

/// Expense waiting for its `EXP-<year>-<seq>` number
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub school_id: Uuid,
    pub academic_year: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub payment_mode: PaymentMode,
    pub expense_date: NaiveDate,
    pub bill_ref: Option<String>,
    pub created_by: Uuid,
}

impl NewExpense {
    pub fn validate(&self) -> FeeResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(FeeError::validation("Expense amount must be greater than zero"));
        }
        if self.amount.normalize().scale() > 2 {
            return Err(FeeError::validation(
                "Expense amount supports at most two decimal places",
            ));
        }
        if self.category.trim().is_empty() {
            return Err(FeeError::validation("Expense category is required"));
        }
        Ok(())
    }

    pub fn into_expense(self, expense_no: String, created_at: DateTime<Utc>) -> Expense {
        Expense {
            id: Uuid::new_v4(),
            school_id: self.school_id,
            academic_year: self.academic_year,
            expense_no,
            amount: self.amount,
            category: self.category.trim().to_string(),
            description: self.description,
            payment_mode: self.payment_mode,
            expense_date: self.expense_date,
            bill_ref: self.bill_ref,
            status: ExpenseStatus::Active,
            created_by: self.created_by,
            cancelled_by: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at,
        }
    }
}
