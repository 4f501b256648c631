//! Domain error model.

use thiserror::Error;

use crate::id::{AccountId, GroupName, SubjectName};

/// Result type used across the domain layer.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Domain-level error.
///
/// Keep this focused on deterministic precondition failures. Storage faults
/// belong to the infrastructure layer and are never represented here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No account with this identity exists.
    #[error("account not found: {0}")]
    NotFound(AccountId),

    /// The caller's role or group authorization does not permit the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Zero, negative where positive is required, malformed, or overflowing.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Applying the operation would drive a balance below zero.
    #[error("insufficient funds on {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: i64,
        requested: i64,
    },

    /// A transfer names the same account as sender and receiver.
    #[error("sender and receiver are the same account")]
    SameAccount,

    /// The issuer is already registered for this (group, subject) pair.
    #[error("{issuer} is already registered for group {group}, subject {subject}")]
    DuplicateGrant {
        issuer: AccountId,
        group: GroupName,
        subject: SubjectName,
    },

    /// An account with this identity already exists.
    #[error("account already exists: {0}")]
    AccountExists(AccountId),

    /// An identifier was invalid (e.g. blank).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl LedgerError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(id: &AccountId) -> Self {
        Self::NotFound(id.clone())
    }
}
