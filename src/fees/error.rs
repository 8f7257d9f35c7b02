use thiserror::Error;

use crate::database::store::StoreError;

/// Errors raised by the fee, enrollment and ledger services.
#[derive(Debug, Error)]
pub enum FeeError {
    /// Missing or malformed input, correctable by the caller
    #[error("{0}")]
    Validation(String),

    /// Financial safety lock, concurrent mutation or state transition conflict
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// A collaborator the operation depends on failed (storage, archive)
    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    /// Computed financial state would break an invariant; nothing was written
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(StoreError),
}

impl FeeError {
    pub fn validation(message: impl Into<String>) -> Self {
        FeeError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        FeeError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        FeeError::NotFound(message.into())
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        FeeError::DependencyFailure(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        FeeError::InvariantViolation(message.into())
    }
}

impl From<StoreError> for FeeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => FeeError::NotFound(msg),
            StoreError::Conflict(msg) => FeeError::Conflict(msg),
            other => FeeError::Store(other),
        }
    }
}

pub type FeeResult<T> = Result<T, FeeError>;
