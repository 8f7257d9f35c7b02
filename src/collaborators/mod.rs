//! Seams to the services the fee core depends on but does not own:
//! binary object storage, the audit trail and the deletion archive.

pub mod archive;
pub mod audit;
pub mod storage;

pub use archive::{ArchiveRecord, ArchiveSink, MemoryArchiveSink, PgArchiveSink};
pub use audit::{record_best_effort, AuditAction, AuditEvent, AuditSink, AuditStatus, MemoryAuditSink, PgAuditSink, TracingAuditSink};
pub use storage::{
    build_storage, mime_for_key, HttpObjectStorage, LocalObjectStorage, ObjectStorage, StorageError, StoredObject,
    UrlSigner,
};
