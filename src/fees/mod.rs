// Student fee lifecycle: structures, enrollment records, allocation,
// concessions and receipts. Pure domain types; persistence lives in
// `crate::database` and orchestration in `crate::services`.

pub mod allocation;
pub mod concession;
pub mod error;
pub mod heads;
pub mod numbering;
pub mod record;
pub mod structure;
pub mod transaction;

pub use allocation::{Allocation, AllocationLine};
pub use concession::{compute_concession, Concession, ConcessionTerms, ConcessionType};
pub use error::{FeeError, FeeResult};
pub use heads::{FeeHead, FeeHeads};
pub use numbering::NumberSeries;
pub use record::{EnrollmentKind, Placement, StudentRecord};
pub use structure::FeeStructure;
pub use transaction::{
    CashDenomination, FeeTransaction, NewFeeTransaction, PaymentMode, TransactionReversal,
    TransactionStatus,
};
