//! Infrastructure and engine error types.
//!
//! `StoreError` covers storage faults and store-enforced constraints.
//! `EngineError` is what ledger callers see: either a deterministic domain
//! rejection or a store failure.

use thiserror::Error;

use tokenledger_auth::GroupGrant;
use tokenledger_core::{AccountId, LedgerError};

/// Store operation error.
///
/// ## Error Categories
///
/// - **Busy**: lock contention on the backing store (retryable)
/// - **Backend**: connection loss, IO, pool exhaustion (retryable)
/// - **Corrupt**: a persisted row could not be decoded
/// - **AccountExists / DuplicateGrant / UnknownAccount**: store-enforced constraints
/// - **NotLocked**: a unit touched an account outside its lock set
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store busy: {0}")]
    Busy(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("account already exists: {0}")]
    AccountExists(AccountId),

    #[error("duplicate group grant: {0:?}")]
    DuplicateGrant(GroupGrant),

    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("account {0} is outside the unit's lock set")]
    NotLocked(AccountId),
}

impl StoreError {
    /// Whether retrying the whole unit may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_) | StoreError::Backend(_))
    }
}

/// Error surfaced by the transfer engine and query service.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Deterministic precondition failure; nothing was applied.
    #[error(transparent)]
    Domain(#[from] LedgerError),

    /// Storage failure; the unit was rolled back and may be retried.
    #[error("store failure: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Domain(_) => false,
            EngineError::Store(e) => e.is_retryable(),
        }
    }

    /// The domain rejection, if this is one.
    pub fn as_domain(&self) -> Option<&LedgerError> {
        match self {
            EngineError::Domain(e) => Some(e),
            EngineError::Store(_) => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::AccountExists(id) => EngineError::Domain(LedgerError::AccountExists(id)),
            StoreError::DuplicateGrant(grant) => EngineError::Domain(LedgerError::DuplicateGrant {
                issuer: grant.issuer,
                group: grant.group,
                subject: grant.subject,
            }),
            StoreError::UnknownAccount(id) => EngineError::Domain(LedgerError::NotFound(id)),
            other => EngineError::Store(other),
        }
    }
}

impl From<tokenledger_auth::AuthzError> for EngineError {
    fn from(value: tokenledger_auth::AuthzError) -> Self {
        EngineError::Domain(value.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
