use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::allocation::AllocationLine;
use super::error::{FeeError, FeeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMode {
    Cash,
    Cheque,
    Upi,
    BankTransfer,
    Card,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Cheque => "cheque",
            PaymentMode::Upi => "upi",
            PaymentMode::BankTransfer => "bankTransfer",
            PaymentMode::Card => "card",
        }
    }

    pub fn requires_reference(&self) -> bool {
        matches!(self, PaymentMode::Cheque | PaymentMode::Upi | PaymentMode::BankTransfer)
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMode::Cash),
            "cheque" => Ok(PaymentMode::Cheque),
            "upi" => Ok(PaymentMode::Upi),
            "bankTransfer" => Ok(PaymentMode::BankTransfer),
            "card" => Ok(PaymentMode::Card),
            other => Err(format!("Unknown payment mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Cancelled,
    Bounced,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Bounced => "bounced",
        }
    }

    pub fn counts_as_paid(&self) -> bool {
        matches!(self, TransactionStatus::Success)
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransactionStatus::Success),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "bounced" => Ok(TransactionStatus::Bounced),
            other => Err(format!("Unknown transaction status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashDenomination {
    pub note: Decimal,
    pub count: u32,
}

impl CashDenomination {
    pub fn value(&self) -> Decimal {
        self.note * Decimal::from(self.count)
    }
}

/// A fee receipt. Only `status` and the cancellation fields ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeTransaction {
    pub id: Uuid,
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub record_id: Uuid,
    pub academic_year: String,
    pub receipt_no: String,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub amount_paid: Decimal,
    pub allocation: Vec<AllocationLine>,
    pub cash_denominations: Vec<CashDenomination>,
    pub reference_number: Option<String>,
    pub remark: Option<String>,
    pub collected_by: Uuid,
    pub status: TransactionStatus,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A receipt waiting for its number. The store assigns the number inside the
/// same unit of work that persists the record update.
#[derive(Debug, Clone)]
pub struct NewFeeTransaction {
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub record_id: Uuid,
    pub academic_year: String,
    pub payment_date: NaiveDate,
    pub payment_mode: PaymentMode,
    pub amount_paid: Decimal,
    pub allocation: Vec<AllocationLine>,
    pub cash_denominations: Vec<CashDenomination>,
    pub reference_number: Option<String>,
    pub remark: Option<String>,
    pub collected_by: Uuid,
}

impl NewFeeTransaction {
    pub fn validate_payment_details(&self) -> FeeResult<()> {
        if !self.cash_denominations.is_empty() {
            if self.payment_mode != PaymentMode::Cash {
                return Err(FeeError::validation(
                    "Cash denominations are only accepted for cash payments",
                ));
            }
            if self
                .cash_denominations
                .iter()
                .any(|d| d.note <= Decimal::ZERO || d.count == 0)
            {
                return Err(FeeError::validation("Cash denominations must be positive"));
            }
            let counted: Decimal = self.cash_denominations.iter().map(|d| d.value()).sum();
            if counted != self.amount_paid {
                return Err(FeeError::validation(format!(
                    "Cash denominations total {} does not match amount paid {}",
                    counted, self.amount_paid
                )));
            }
        }

        let has_reference = self
            .reference_number
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false);
        if self.payment_mode.requires_reference() && !has_reference {
            return Err(FeeError::validation(format!(
                "A reference number is required for {} payments",
                self.payment_mode
            )));
        }
        Ok(())
    }

    pub fn into_transaction(self, receipt_no: String, created_at: DateTime<Utc>) -> FeeTransaction {
        FeeTransaction {
            id: Uuid::new_v4(),
            school_id: self.school_id,
            student_id: self.student_id,
            record_id: self.record_id,
            academic_year: self.academic_year,
            receipt_no,
            payment_date: self.payment_date,
            payment_mode: self.payment_mode,
            amount_paid: self.amount_paid,
            allocation: self.allocation,
            cash_denominations: self.cash_denominations,
            reference_number: self.reference_number,
            remark: self.remark,
            collected_by: self.collected_by,
            status: TransactionStatus::Success,
            cancel_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at,
        }
    }
}

/// Status change applied when a receipt is reversed.
#[derive(Debug, Clone)]
pub struct TransactionReversal {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub reason: String,
    pub cancelled_by: Uuid,
    pub cancelled_at: DateTime<Utc>,
}

impl FeeTransaction {
    pub fn apply_reversal(&mut self, reversal: &TransactionReversal) -> FeeResult<()> {
        if self.status != TransactionStatus::Success {
            return Err(FeeError::conflict(format!(
                "Receipt {} is already {}",
                self.receipt_no,
                self.status.as_str()
            )));
        }
        if reversal.status == TransactionStatus::Success {
            return Err(FeeError::validation("A receipt can only be cancelled or bounced"));
        }
        self.status = reversal.status;
        self.cancel_reason = Some(reversal.reason.clone());
        self.cancelled_by = Some(reversal.cancelled_by);
        self.cancelled_at = Some(reversal.cancelled_at);
        Ok(())
    }
}
