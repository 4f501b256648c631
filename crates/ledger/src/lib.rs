//! Token ledger domain (accounts, immutable entries, posting plans).
//!
//! Pure domain logic only: no IO, no persistence concerns. The planners in
//! [`posting`] decide *what* an operation changes; applying a plan atomically
//! is the store's job.

pub mod account;
pub mod entry;
pub mod posting;

pub use account::{Account, NewAccount};
pub use entry::{reconstruct_balance, EntryKind, LedgerEntry, NewEntry};
pub use posting::{
    check_issue_amount, check_transfer_request, plan_issue, plan_revoke, plan_transfer, requested_amount,
    BalanceAdjustment, Posting,
};
