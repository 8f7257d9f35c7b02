use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::collaborators::{record_best_effort, AuditAction, AuditEvent, AuditSink};
use crate::config::FeesConfig;
use crate::database::store::{FeeStore, Page, StoreError, TransactionFilter};
use crate::fees::{
    Allocation, AllocationLine, CashDenomination, FeeError, FeeResult, FeeTransaction, NewFeeTransaction,
    NumberSeries, PaymentMode, StudentRecord, TransactionReversal, TransactionStatus,
};
use crate::ledger::{LedgerEntry, LedgerReference, NewLedgerEntry};

const MODULE: &str = "fee_collection";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectFeeRequest {
    pub student_id: Uuid,
    pub record_id: Uuid,
    pub amount_paid: Decimal,
    pub payment_mode: PaymentMode,
    /// Explicit per-head split; FIFO over the fixed priority when absent
    pub allocation: Option<Vec<AllocationLine>>,
    #[serde(default)]
    pub cash_denominations: Vec<CashDenomination>,
    pub reference_number: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTransactionRequest {
    #[serde(default = "default_reversal_status")]
    pub status: TransactionStatus,
    pub reason: String,
}

fn default_reversal_status() -> TransactionStatus {
    TransactionStatus::Cancelled
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOutcome {
    pub transaction: FeeTransaction,
    pub record: StudentRecord,
    /// Absent when the ledger mirror failed; reconciliation reports the gap
    pub ledger_entry: Option<LedgerEntry>,
}

/// Takes payments against a student record and reverses them.
#[derive(Clone)]
pub struct CollectionService {
    store: Arc<dyn FeeStore>,
    audit: Arc<dyn AuditSink>,
    fees: FeesConfig,
}

impl CollectionService {
    pub fn new(store: Arc<dyn FeeStore>, audit: Arc<dyn AuditSink>, fees: FeesConfig) -> Self {
        Self { store, audit, fees }
    }

    async fn load_record(&self, school_id: Uuid, record_id: Uuid) -> FeeResult<StudentRecord> {
        self.store
            .get_record(school_id, record_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student record not found"))
    }

    pub async fn collect_fee(&self, actor: &Actor, request: CollectFeeRequest) -> FeeResult<CollectionOutcome> {
        let series = NumberSeries::new(self.fees.receipt_prefix.clone(), Utc::now().year());
        let payment_date = request.payment_date.unwrap_or_else(|| Utc::now().date_naive());
        let attempts = self.fees.max_commit_retries.max(1);
        let mut attempt = 0;

        let (record, transaction) = loop {
            attempt += 1;
            let record = self.load_record(actor.school_id, request.record_id).await?;
            if record.student_id != request.student_id {
                return Err(FeeError::not_found("Student record not found for this student"));
            }
            if !record.is_active {
                return Err(FeeError::validation("Enrollment is not active"));
            }

            let allocation = Allocation::allocate(request.amount_paid, &record.dues, request.allocation.as_deref())
                .map_err(|e| {
                    warn!(record = %record.id, amount = %request.amount_paid, "Payment rejected: {}", e);
                    e
                })?;

            let mut next = record.clone();
            next.apply_allocation(&allocation)?;

            let draft = NewFeeTransaction {
                school_id: actor.school_id,
                student_id: record.student_id,
                record_id: record.id,
                academic_year: record.academic_year.clone(),
                payment_date,
                payment_mode: request.payment_mode,
                amount_paid: request.amount_paid,
                allocation: allocation.into_lines(),
                cash_denominations: request.cash_denominations.clone(),
                reference_number: request.reference_number.clone(),
                remark: request.remark.clone(),
                collected_by: actor.user_id,
            };
            draft.validate_payment_details()?;

            match self.store.commit_collection(next, record.version, draft, &series).await {
                Ok(committed) => break committed,
                Err(StoreError::Conflict(msg)) if attempt < attempts => {
                    warn!(record = %record.id, attempt, "Collection commit conflicted, retrying: {}", msg);
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(
            receipt = %transaction.receipt_no,
            record = %record.id,
            amount = %transaction.amount_paid,
            mode = %transaction.payment_mode,
            "Fee collected"
        );

        let ledger_entry = self.mirror_to_ledger(&transaction, Some(record.section_id)).await;

        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Collect,
                MODULE,
                Some(transaction.id),
                format!(
                    "Collected {} from student {} (receipt {})",
                    transaction.amount_paid, transaction.student_id, transaction.receipt_no
                ),
            ),
        )
        .await;

        Ok(CollectionOutcome {
            transaction,
            record,
            ledger_entry,
        })
    }

    /// CREDIT entry for a committed receipt. Failures are logged, not raised.
    async fn mirror_to_ledger(&self, transaction: &FeeTransaction, section_id: Option<Uuid>) -> Option<LedgerEntry> {
        let entry = NewLedgerEntry::for_fee_transaction(transaction, section_id).into_entry(Utc::now());
        match self.store.insert_ledger_entry(entry).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!(
                    receipt = %transaction.receipt_no,
                    "Ledger mirror failed; run reconciliation to repair: {}",
                    e
                );
                None
            }
        }
    }

    pub async fn cancel_transaction(
        &self,
        actor: &Actor,
        transaction_id: Uuid,
        request: CancelTransactionRequest,
    ) -> FeeResult<FeeTransaction> {
        if request.status == TransactionStatus::Success {
            return Err(FeeError::validation("A receipt can only be cancelled or bounced"));
        }
        if request.reason.trim().is_empty() {
            return Err(FeeError::validation("A cancellation reason is required"));
        }

        let attempts = self.fees.max_commit_retries.max(1);
        let mut attempt = 0;
        let (record, transaction) = loop {
            attempt += 1;
            let transaction = self.get_transaction(actor.school_id, transaction_id).await?;
            if transaction.status != TransactionStatus::Success {
                return Err(FeeError::conflict(format!(
                    "Receipt {} is already {}",
                    transaction.receipt_no,
                    transaction.status.as_str()
                )));
            }

            let record = self.load_record(actor.school_id, transaction.record_id).await?;
            let mut next = record.clone();
            next.reverse_allocation(&transaction.allocation)?;

            let reversal = TransactionReversal {
                transaction_id,
                status: request.status,
                reason: request.reason.trim().to_string(),
                cancelled_by: actor.user_id,
                cancelled_at: Utc::now(),
            };
            match self.store.commit_reversal(next, record.version, &reversal).await {
                Ok(committed) => break committed,
                Err(StoreError::Conflict(msg)) if attempt < attempts => {
                    warn!(receipt = %transaction.receipt_no, attempt, "Reversal conflicted, retrying: {}", msg);
                }
                Err(e) => return Err(e.into()),
            }
        };

        match self
            .store
            .find_active_ledger_entry(actor.school_id, LedgerReference::FeeTransaction(transaction.id))
            .await
        {
            Ok(Some(entry)) => {
                let reason = format!("Receipt {} {}", transaction.receipt_no, transaction.status.as_str());
                if let Err(e) = self
                    .store
                    .cancel_ledger_entry(actor.school_id, entry.id, actor.user_id, &reason, Utc::now())
                    .await
                {
                    error!(receipt = %transaction.receipt_no, "Failed to cancel ledger entry: {}", e);
                }
            }
            Ok(None) => warn!(receipt = %transaction.receipt_no, "No active ledger entry to cancel"),
            Err(e) => error!(receipt = %transaction.receipt_no, "Ledger lookup failed: {}", e),
        }

        info!(
            receipt = %transaction.receipt_no,
            record = %record.id,
            status = transaction.status.as_str(),
            "Receipt reversed"
        );
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Cancel,
                MODULE,
                Some(transaction.id),
                format!(
                    "Marked receipt {} as {}: {}",
                    transaction.receipt_no,
                    transaction.status.as_str(),
                    request.reason.trim()
                ),
            ),
        )
        .await;
        Ok(transaction)
    }

    pub async fn get_transaction(&self, school_id: Uuid, transaction_id: Uuid) -> FeeResult<FeeTransaction> {
        self.store
            .get_transaction(school_id, transaction_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Transaction not found"))
    }

    pub async fn list_transactions(&self, filter: &TransactionFilter) -> FeeResult<Page<FeeTransaction>> {
        Ok(self.store.list_transactions(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::collaborators::MemoryAuditSink;
    use crate::database::memory::MemoryStore;
    use crate::fees::{EnrollmentKind, FeeHead, FeeHeads, FeeStructure, Placement};

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    async fn fixture() -> (Arc<MemoryStore>, CollectionService, Actor, StudentRecord) {
        let store = Arc::new(MemoryStore::new());
        let actor = Actor {
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            role: Role::Accountant,
        };
        let structure = FeeStructure::new(
            actor.school_id,
            Uuid::new_v4(),
            FeeHeads {
                admission_fee: d(5000),
                first_term_amt: d(3000),
                ..Default::default()
            },
        )
        .unwrap();
        let record = StudentRecord::seed(
            Placement {
                school_id: actor.school_id,
                student_id: Uuid::new_v4(),
                academic_year: "2025-2026".into(),
                class_id: structure.class_id,
                section_id: Uuid::new_v4(),
                class_name: "V".into(),
                section_name: "A".into(),
                new_old: EnrollmentKind::New,
                roll_number: None,
                is_bus_applicable: false,
            },
            &structure,
        );
        let record = store.upsert_unpaid_record(record).await.unwrap();
        let service = CollectionService::new(store.clone(), Arc::new(MemoryAuditSink::new()), FeesConfig::default());
        (store, service, actor, record)
    }

    fn cash(record: &StudentRecord, amount: i64) -> CollectFeeRequest {
        CollectFeeRequest {
            student_id: record.student_id,
            record_id: record.id,
            amount_paid: d(amount),
            payment_mode: PaymentMode::Cash,
            allocation: None,
            cash_denominations: Vec::new(),
            reference_number: None,
            payment_date: None,
            remark: None,
        }
    }

    #[tokio::test]
    async fn collects_in_priority_order_and_mirrors_credit() {
        let (_store, service, actor, record) = fixture().await;
        let outcome = service.collect_fee(&actor, cash(&record, 6000)).await.unwrap();

        assert_eq!(outcome.record.fee_paid.get(FeeHead::AdmissionFee), d(5000));
        assert_eq!(outcome.record.fee_paid.get(FeeHead::FirstTermAmt), d(1000));
        assert_eq!(outcome.record.dues.get(FeeHead::FirstTermAmt), d(2000));
        assert_eq!(
            outcome.transaction.receipt_no,
            format!("REC-{}-0001", Utc::now().year())
        );
        let entry = outcome.ledger_entry.expect("credit entry");
        assert_eq!(entry.amount, d(6000));
    }

    #[tokio::test]
    async fn overpayment_leaves_everything_untouched() {
        let (store, service, actor, record) = fixture().await;
        service.collect_fee(&actor, cash(&record, 6000)).await.unwrap();

        let err = service.collect_fee(&actor, cash(&record, 10000)).await.unwrap_err();
        assert!(matches!(err, FeeError::Validation(ref m) if m.contains("exceeds outstanding")));

        let after = store.get_record(actor.school_id, record.id).await.unwrap().unwrap();
        assert_eq!(after.outstanding(), d(2000));

        let next = service.collect_fee(&actor, cash(&record, 2000)).await.unwrap();
        assert_eq!(next.transaction.receipt_no, format!("REC-{}-0002", Utc::now().year()));
    }

    #[tokio::test]
    async fn ledger_outage_does_not_fail_collection() {
        let (store, service, actor, record) = fixture().await;
        store.set_ledger_unavailable(true);
        let outcome = service.collect_fee(&actor, cash(&record, 100)).await.unwrap();
        assert!(outcome.ledger_entry.is_none());
        assert_eq!(outcome.record.paid_total(), d(100));
    }

    #[tokio::test]
    async fn cancellation_restores_dues_and_cancels_credit() {
        let (store, service, actor, record) = fixture().await;
        let outcome = service.collect_fee(&actor, cash(&record, 6000)).await.unwrap();

        let cancelled = service
            .cancel_transaction(
                &actor,
                outcome.transaction.id,
                CancelTransactionRequest {
                    status: TransactionStatus::Bounced,
                    reason: "cheque returned".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Bounced);

        let after = store.get_record(actor.school_id, record.id).await.unwrap().unwrap();
        assert_eq!(after.outstanding(), d(8000));
        assert!(!after.has_payments());

        let entry = store
            .find_active_ledger_entry(actor.school_id, LedgerReference::FeeTransaction(cancelled.id))
            .await
            .unwrap();
        assert!(entry.is_none());

        let again = service
            .cancel_transaction(
                &actor,
                cancelled.id,
                CancelTransactionRequest {
                    status: TransactionStatus::Cancelled,
                    reason: "twice".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(again, FeeError::Conflict(_)));
    }

    #[tokio::test]
    async fn wrong_student_is_not_found() {
        let (_store, service, actor, record) = fixture().await;
        let mut request = cash(&record, 100);
        request.student_id = Uuid::new_v4();
        assert!(matches!(
            service.collect_fee(&actor, request).await.unwrap_err(),
            FeeError::NotFound(_)
        ));
    }
}
