//! Infrastructure layer: stores, the transfer engine, queries and config.

pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod store;


pub use config::{LedgerConfig, RetryPolicy};
pub use engine::{IssueReceipt, TransferEngine, TransferReceipt};
pub use error::{EngineError, EngineResult, StoreError};
pub use query::{
    IssuerHistoryLine, LeaderboardRow, QueryService, Reconciliation, RosterGroup, Statement, StatementLine,
};
pub use store::{
    BalanceChange, EntryIndex, EntryPages, InMemoryLedgerStore, LedgerSnapshot, LedgerStore, Pagination,
    SqliteLedgerStore, UnitOfWork,
};
