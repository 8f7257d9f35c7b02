use std::sync::Arc;

use crate::collaborators::{ArchiveSink, AuditSink, ObjectStorage};
use crate::config::AppConfig;
use crate::database::store::{FeeStore, PageRequest};
use crate::services::{
    CollectionService, ConcessionService, EnrollmentService, ExpenseService, FeeStructureService, LedgerService,
};

/// Shared handler state: the store plus one instance of each service.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FeeStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub fee_structures: FeeStructureService,
    pub enrollments: EnrollmentService,
    pub concessions: ConcessionService,
    pub collections: CollectionService,
    pub ledger: LedgerService,
    pub expenses: ExpenseService,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
}

impl AppState {
    pub fn new(
        store: Arc<dyn FeeStore>,
        storage: Arc<dyn ObjectStorage>,
        audit: Arc<dyn AuditSink>,
        archive: Arc<dyn ArchiveSink>,
        config: &AppConfig,
    ) -> Self {
        let ledger = LedgerService::new(store.clone(), audit.clone());
        Self {
            fee_structures: FeeStructureService::new(store.clone(), audit.clone()),
            enrollments: EnrollmentService::new(store.clone(), audit.clone(), archive),
            concessions: ConcessionService::new(store.clone(), storage.clone(), audit.clone()),
            collections: CollectionService::new(store.clone(), audit.clone(), config.fees.clone()),
            expenses: ExpenseService::new(
                store.clone(),
                storage.clone(),
                audit,
                ledger.clone(),
                config.fees.expense_prefix.clone(),
            ),
            ledger,
            store,
            storage,
            default_page_limit: config.api.default_page_limit,
            max_page_limit: config.api.max_page_limit,
        }
    }

    /// Page request from raw query values, clamped to the configured limits
    pub fn page(&self, page: Option<u32>, limit: Option<u32>) -> PageRequest {
        PageRequest::new(page, Some(limit.unwrap_or(self.default_page_limit)), self.max_page_limit)
    }
}
