// Financial ledger: append-only CREDIT/DEBIT entries mirroring receipts and
// expenses, plus balance and reconciliation over them.

pub mod entry;
pub mod expense;
pub mod report;

pub use entry::{
    LedgerEntry, LedgerReference, LedgerStatus, NewLedgerEntry, TransactionType,
    FEE_COLLECTION_CATEGORY,
};
pub use expense::{Expense, ExpenseStatus, NewExpense};
pub use report::{compute_balance, reconcile, LedgerBalance, LedgerFilter, ReconciliationReport};
