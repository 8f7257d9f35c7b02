pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use manager::{DatabaseError, DatabaseManager};
pub use memory::MemoryStore;
pub use postgres::PgFeeStore;
pub use store::{FeeStore, Page, PageRequest, RecordFilter, StoreError, StoreResult, TransactionFilter};
