use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{LedgerEntry, LedgerReference, LedgerStatus, TransactionType};
use crate::database::store::PageRequest;
use crate::fees::{FeeTransaction, PaymentMode};

/// Query over a school's ledger. `school_id` always comes from the caller's
/// session, never from the query string.
#[derive(Debug, Clone)]
pub struct LedgerFilter {
    pub school_id: Uuid,
    pub academic_year: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub status: Option<LedgerStatus>,
    pub payment_mode: Option<PaymentMode>,
    pub section_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub page: PageRequest,
}

impl LedgerFilter {
    pub fn for_school(school_id: Uuid) -> Self {
        Self {
            school_id,
            academic_year: None,
            transaction_type: None,
            status: None,
            payment_mode: None,
            section_id: None,
            from_date: None,
            to_date: None,
            page: PageRequest::default(),
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        entry.school_id == self.school_id
            && self.academic_year.as_ref().map_or(true, |y| &entry.academic_year == y)
            && self.transaction_type.map_or(true, |t| entry.transaction_type == t)
            && self.status.map_or(true, |s| entry.status == s)
            && self.payment_mode.map_or(true, |m| entry.payment_mode == Some(m))
            && self.section_id.map_or(true, |s| entry.section_id == Some(s))
            && self.from_date.map_or(true, |d| entry.date >= d)
            && self.to_date.map_or(true, |d| entry.date <= d)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBalance {
    pub credit: Decimal,
    pub debit: Decimal,
    pub balance: Decimal,
}

/// Authoritative balance: active CREDIT minus active DEBIT
pub fn compute_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> LedgerBalance {
    let mut credit = Decimal::ZERO;
    let mut debit = Decimal::ZERO;
    for entry in entries.into_iter().filter(|e| e.is_active()) {
        match entry.transaction_type {
            TransactionType::Credit => credit += entry.amount,
            TransactionType::Debit => debit += entry.amount,
        }
    }
    LedgerBalance {
        credit,
        debit,
        balance: credit - debit,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub academic_year: String,
    pub receipts_total: Decimal,
    pub ledger_fee_credit_total: Decimal,
    pub difference: Decimal,
    /// Successful receipts with no active ledger entry
    pub missing_receipts: Vec<String>,
    /// Active fee entries whose receipt is cancelled, bounced or unknown
    pub orphaned_entries: Vec<Uuid>,
    pub consistent: bool,
}

/// Compare successful receipts with the active CREDIT entries that mirror them
pub fn reconcile(
    academic_year: &str,
    transactions: &[FeeTransaction],
    entries: &[LedgerEntry],
) -> ReconciliationReport {
    let mut mirrored: HashMap<Uuid, &LedgerEntry> = HashMap::new();
    let mut ledger_fee_credit_total = Decimal::ZERO;

    for entry in entries.iter().filter(|e| e.is_active()) {
        if let (LedgerReference::FeeTransaction(txn_id), TransactionType::Credit) =
            (entry.reference, entry.transaction_type)
        {
            ledger_fee_credit_total += entry.amount;
            mirrored.insert(txn_id, entry);
        }
    }

    let paid: Vec<&FeeTransaction> = transactions
        .iter()
        .filter(|t| t.status.counts_as_paid())
        .collect();
    let receipts_total: Decimal = paid.iter().map(|t| t.amount_paid).sum();

    let missing_receipts: Vec<String> = paid
        .iter()
        .filter(|t| !mirrored.contains_key(&t.id))
        .map(|t| t.receipt_no.clone())
        .collect();

    let orphaned_entries: Vec<Uuid> = mirrored
        .iter()
        .filter(|(txn_id, _)| !paid.iter().any(|t| t.id == **txn_id))
        .map(|(_, entry)| entry.id)
        .collect();

    let difference = receipts_total - ledger_fee_credit_total;
    ReconciliationReport {
        academic_year: academic_year.to_string(),
        receipts_total,
        ledger_fee_credit_total,
        difference,
        consistent: difference.is_zero() && missing_receipts.is_empty() && orphaned_entries.is_empty(),
        missing_receipts,
        orphaned_entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::{NewFeeTransaction, TransactionStatus};
    use crate::ledger::entry::NewLedgerEntry;
    use chrono::Utc;

    fn receipt(school_id: Uuid, amount: i64, seq: i64) -> FeeTransaction {
        NewFeeTransaction {
            school_id,
            student_id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            academic_year: "2025-2026".into(),
            payment_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            payment_mode: PaymentMode::Cash,
            amount_paid: Decimal::from(amount),
            allocation: Vec::new(),
            cash_denominations: Vec::new(),
            reference_number: None,
            remark: None,
            collected_by: Uuid::new_v4(),
        }
        .into_transaction(format!("REC-2025-{:04}", seq), Utc::now())
    }

    #[test]
    fn balance_ignores_cancelled_entries() {
        let school = Uuid::new_v4();
        let a = receipt(school, 6000, 1);
        let b = receipt(school, 1000, 2);
        let mut entries = vec![
            NewLedgerEntry::for_fee_transaction(&a, None).into_entry(Utc::now()),
            NewLedgerEntry::for_fee_transaction(&b, None).into_entry(Utc::now()),
        ];
        entries[1].cancel(Uuid::new_v4(), "bounced", Utc::now()).unwrap();

        let balance = compute_balance(&entries);
        assert_eq!(balance.credit, Decimal::from(6000));
        assert_eq!(balance.debit, Decimal::ZERO);
        assert_eq!(balance.balance, Decimal::from(6000));
    }

    #[test]
    fn reconcile_reports_missing_mirror() {
        let school = Uuid::new_v4();
        let a = receipt(school, 6000, 1);
        let b = receipt(school, 2000, 2);
        let entries = vec![NewLedgerEntry::for_fee_transaction(&a, None).into_entry(Utc::now())];

        let report = reconcile("2025-2026", &[a.clone(), b.clone()], &entries);
        assert!(!report.consistent);
        assert_eq!(report.missing_receipts, vec![b.receipt_no.clone()]);
        assert_eq!(report.difference, Decimal::from(2000));

        let entries = vec![
            NewLedgerEntry::for_fee_transaction(&a, None).into_entry(Utc::now()),
            NewLedgerEntry::for_fee_transaction(&b, None).into_entry(Utc::now()),
        ];
        assert!(reconcile("2025-2026", &[a, b], &entries).consistent);
    }

    #[test]
    fn reversed_receipts_need_no_mirror() {
        let school = Uuid::new_v4();
        let a = receipt(school, 6000, 1);
        let mut cancelled = receipt(school, 500, 2);
        cancelled.status = TransactionStatus::Cancelled;
        let mut bounced = receipt(school, 700, 3);
        bounced.status = TransactionStatus::Bounced;
        let entries = vec![NewLedgerEntry::for_fee_transaction(&a, None).into_entry(Utc::now())];

        let report = reconcile("2025-2026", &[a, cancelled, bounced], &entries);
        assert!(report.consistent);
        assert_eq!(report.receipts_total, Decimal::from(6000));
        assert!(report.missing_receipts.is_empty());
    }

    #[test]
    fn filter_matches_on_every_dimension() {
        let school = Uuid::new_v4();
        let section = Uuid::new_v4();
        let entry = NewLedgerEntry::for_fee_transaction(&receipt(school, 10, 1), Some(section))
            .into_entry(Utc::now());

        let mut filter = LedgerFilter::for_school(school);
        assert!(filter.matches(&entry));
        filter.section_id = Some(section);
        filter.payment_mode = Some(PaymentMode::Cash);
        filter.from_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        assert!(filter.matches(&entry));
        filter.to_date = NaiveDate::from_ymd_opt(2025, 5, 31);
        assert!(!filter.matches(&entry));
        assert!(!LedgerFilter::for_school(Uuid::new_v4()).matches(&entry));
    }
}
