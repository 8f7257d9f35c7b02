use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::collaborators::{record_best_effort, AuditAction, AuditEvent, AuditSink};
use crate::database::store::{FeeStore, Page, StoreError};
use crate::fees::{FeeError, FeeResult};
use crate::ledger::{
    compute_balance, reconcile, LedgerBalance, LedgerEntry, LedgerFilter, LedgerReference, NewLedgerEntry,
    ReconciliationReport,
};

const MODULE: &str = "ledger";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub academic_year: String,
    pub created: Vec<LedgerEntry>,
    /// Receipts whose entry could not be written this run
    pub failed: Vec<String>,
}

/// The CREDIT/DEBIT book. Entries are appended or cancelled, never edited.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn FeeStore>,
    audit: Arc<dyn AuditSink>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn FeeStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn create_ledger_entry(&self, actor: &Actor, draft: NewLedgerEntry) -> FeeResult<LedgerEntry> {
        if draft.school_id != actor.school_id {
            return Err(FeeError::validation("Ledger entry belongs to another school"));
        }
        draft.validate()?;
        let saved = self.store.insert_ledger_entry(draft.into_entry(Utc::now())).await?;
        info!(
            entry = %saved.id,
            kind = saved.transaction_type.as_str(),
            amount = %saved.amount,
            "Ledger entry created"
        );
        Ok(saved)
    }

    pub async fn cancel_ledger_entry(&self, actor: &Actor, entry_id: Uuid, reason: &str) -> FeeResult<LedgerEntry> {
        if reason.trim().is_empty() {
            return Err(FeeError::validation("A cancellation reason is required"));
        }
        let entry = self
            .store
            .cancel_ledger_entry(actor.school_id, entry_id, actor.user_id, reason.trim(), Utc::now())
            .await?;
        info!(entry = %entry.id, amount = %entry.amount, "Ledger entry cancelled");
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::success(
                actor,
                AuditAction::Cancel,
                MODULE,
                Some(entry.id),
                format!("Cancelled {} entry of {}: {}", entry.transaction_type.as_str(), entry.amount, reason.trim()),
            ),
        )
        .await;
        Ok(entry)
    }

    pub async fn get_entry(&self, school_id: Uuid, entry_id: Uuid) -> FeeResult<LedgerEntry> {
        self.store
            .get_ledger_entry(school_id, entry_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Ledger entry not found"))
    }

    pub async fn list_entries(&self, filter: &LedgerFilter) -> FeeResult<Page<LedgerEntry>> {
        Ok(self.store.list_ledger_entries(filter).await?)
    }

    pub async fn balance(&self, school_id: Uuid, academic_year: &str) -> FeeResult<LedgerBalance> {
        let entries = self.store.ledger_entries_for_year(school_id, academic_year).await?;
        Ok(compute_balance(&entries))
    }

    pub async fn reconcile(&self, school_id: Uuid, academic_year: &str) -> FeeResult<ReconciliationReport> {
        let transactions = self.store.transactions_for_year(school_id, academic_year).await?;
        let entries = self.store.ledger_entries_for_year(school_id, academic_year).await?;
        let report = reconcile(academic_year, &transactions, &entries);
        if !report.consistent {
            warn!(
                school = %school_id,
                year = %academic_year,
                difference = %report.difference,
                missing = report.missing_receipts.len(),
                orphaned = report.orphaned_entries.len(),
                "Ledger out of step with receipts"
            );
        }
        Ok(report)
    }

    /// Write the CREDIT entries that successful receipts are missing.
    /// Running it twice creates nothing the second time.
    pub async fn backfill(&self, actor: &Actor, academic_year: &str) -> FeeResult<BackfillReport> {
        let transactions = self.store.transactions_for_year(actor.school_id, academic_year).await?;
        let entries = self.store.ledger_entries_for_year(actor.school_id, academic_year).await?;

        let mirrored: HashSet<Uuid> = entries
            .iter()
            .filter(|e| e.is_active())
            .filter_map(|e| match e.reference {
                LedgerReference::FeeTransaction(id) => Some(id),
                LedgerReference::Expense(_) => None,
            })
            .collect();

        let mut created = Vec::new();
        let mut failed = Vec::new();
        for txn in transactions
            .iter()
            .filter(|t| t.status.counts_as_paid() && !mirrored.contains(&t.id))
        {
            let section_id = match self.store.get_record(actor.school_id, txn.record_id).await {
                Ok(record) => record.map(|r| r.section_id),
                Err(e) => {
                    warn!(receipt = %txn.receipt_no, "Record lookup failed during backfill: {}", e);
                    None
                }
            };
            let entry = NewLedgerEntry::for_fee_transaction(txn, section_id).into_entry(Utc::now());
            match self.store.insert_ledger_entry(entry).await {
                Ok(saved) => created.push(saved),
                // Someone else mirrored it in the meantime
                Err(StoreError::Conflict(_)) => {}
                Err(e) => {
                    error!(receipt = %txn.receipt_no, "Backfill insert failed: {}", e);
                    failed.push(txn.receipt_no.clone());
                }
            }
        }

        info!(
            school = %actor.school_id,
            year = %academic_year,
            created = created.len(),
            failed = failed.len(),
            "Ledger backfill finished"
        );
        if !created.is_empty() {
            record_best_effort(
                self.audit.as_ref(),
                AuditEvent::success(
                    actor,
                    AuditAction::Create,
                    MODULE,
                    None,
                    format!("Backfilled {} ledger entries for {}", created.len(), academic_year),
                ),
            )
            .await;
        }

        Ok(BackfillReport {
            academic_year: academic_year.to_string(),
            created,
            failed,
        })
    }
}
