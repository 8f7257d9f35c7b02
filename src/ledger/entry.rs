use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fees::{FeeError, FeeResult, FeeTransaction, PaymentMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(TransactionType::Credit),
            "DEBIT" => Ok(TransactionType::Debit),
            other => Err(format!("Unknown transaction type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Active,
    Cancelled,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Active => "active",
            LedgerStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LedgerStatus::Active),
            "cancelled" => Ok(LedgerStatus::Cancelled),
            other => Err(format!("Unknown ledger status '{}'", other)),
        }
    }
}

/// The business document a ledger entry mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "model", content = "id")]
pub enum LedgerReference {
    FeeTransaction(Uuid),
    Expense(Uuid),
}

impl LedgerReference {
    pub fn model(&self) -> &'static str {
        match self {
            LedgerReference::FeeTransaction(_) => "FeeTransaction",
            LedgerReference::Expense(_) => "Expense",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            LedgerReference::FeeTransaction(id) | LedgerReference::Expense(id) => *id,
        }
    }

    pub fn from_parts(model: &str, id: Uuid) -> Result<Self, String> {
        match model {
            "FeeTransaction" => Ok(LedgerReference::FeeTransaction(id)),
            "Expense" => Ok(LedgerReference::Expense(id)),
            other => Err(format!("Unknown ledger reference model '{}'", other)),
        }
    }
}

pub const FEE_COLLECTION_CATEGORY: &str = "Fee Collection";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub school_id: Uuid,
    pub academic_year: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub reference: LedgerReference,
    pub student_record_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
    pub payment_mode: Option<PaymentMode>,
    pub category: String,
    pub description: Option<String>,
    pub status: LedgerStatus,
    pub created_by: Uuid,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_active(&self) -> bool {
        self.status == LedgerStatus::Active
    }

    /// Flip to cancelled. The amount is never touched.
    pub fn cancel(&mut self, cancelled_by: Uuid, reason: &str, at: DateTime<Utc>) -> FeeResult<()> {
        if !self.is_active() {
            return Err(FeeError::conflict("Ledger entry is already cancelled"));
        }
        self.status = LedgerStatus::Cancelled;
        self.cancelled_by = Some(cancelled_by);
        self.cancel_reason = Some(reason.to_string());
        self.cancelled_at = Some(at);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerEntry {
    pub school_id: Uuid,
    pub academic_year: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub reference: LedgerReference,
    pub student_record_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
    pub payment_mode: Option<PaymentMode>,
    pub category: String,
    pub description: Option<String>,
    pub created_by: Uuid,
}

impl NewLedgerEntry {
    /// CREDIT entry mirroring a fee receipt
    pub fn for_fee_transaction(txn: &FeeTransaction, section_id: Option<Uuid>) -> Self {
        Self {
            school_id: txn.school_id,
            academic_year: txn.academic_year.clone(),
            transaction_type: TransactionType::Credit,
            amount: txn.amount_paid,
            date: txn.payment_date,
            reference: LedgerReference::FeeTransaction(txn.id),
            student_record_id: Some(txn.record_id),
            section_id,
            payment_mode: Some(txn.payment_mode),
            category: FEE_COLLECTION_CATEGORY.to_string(),
            description: Some(format!("Fee receipt {}", txn.receipt_no)),
            created_by: txn.collected_by,
        }
    }

    pub fn validate(&self) -> FeeResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(FeeError::validation("Ledger amount must be greater than zero"));
        }
        if self.academic_year.trim().is_empty() {
            return Err(FeeError::validation("Ledger entry needs an academic year"));
        }
        if self.category.trim().is_empty() {
            return Err(FeeError::validation("Ledger entry needs a category"));
        }
        Ok(())
    }

    pub fn into_entry(self, created_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            school_id: self.school_id,
            academic_year: self.academic_year,
            transaction_type: self.transaction_type,
            amount: self.amount,
            date: self.date,
            reference: self.reference,
            student_record_id: self.student_record_id,
            section_id: self.section_id,
            payment_mode: self.payment_mode,
            category: self.category,
            description: self.description,
            status: LedgerStatus::Active,
            created_by: self.created_by,
            cancelled_by: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_serializes_as_tagged_pair() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(LedgerReference::Expense(id)).unwrap();
        assert_eq!(value["model"], "Expense");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(LedgerReference::from_parts("Expense", id), Ok(LedgerReference::Expense(id)));
        assert!(LedgerReference::from_parts("Invoice", id).is_err());
    }

    #[test]
    fn cancel_keeps_amount_and_is_one_way() {
        let mut entry = NewLedgerEntry {
            school_id: Uuid::new_v4(),
            academic_year: "2025-2026".into(),
            transaction_type: TransactionType::Debit,
            amount: Decimal::from(250),
            date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            reference: LedgerReference::Expense(Uuid::new_v4()),
            student_record_id: None,
            section_id: None,
            payment_mode: None,
            category: "Stationery".into(),
            description: None,
            created_by: Uuid::new_v4(),
        }
        .into_entry(Utc::now());

        entry.cancel(Uuid::new_v4(), "duplicate", Utc::now()).unwrap();
        assert_eq!(entry.amount, Decimal::from(250));
        assert_eq!(entry.status, LedgerStatus::Cancelled);
        assert!(entry.cancel(Uuid::new_v4(), "again", Utc::now()).is_err());
    }
}
