//! `tokenledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers shared by every layer and the ledger's error model.

pub mod error;
pub mod id;

pub use error::{LedgerError, LedgerResult};
pub use id::{AccountId, EntrySeq, GroupName, SubjectName};
