//! Account store, entry log and authorization table boundary.
//!
//! The ledger's durable state lives behind [`LedgerStore`]. Mutations happen
//! only through a [`UnitOfWork`], which commits all of its balance
//! adjustments and entries together or none of them. Reads go through a
//! [`LedgerSnapshot`], which observes one consistent point in the history.
//!
//! ## Atomic units
//!
//! ```text
//! begin(lock_set)            -- acquire the unit boundary (ordered per account)
//!   adjust_balance(a, -x)    -- rejected if a's balance would go negative
//!   adjust_balance(b, +x)
//!   append(entry)            -- seq + timestamp assigned by the store
//! commit()                   -- everything becomes visible at once
//! ```
//!
//! Dropping a unit without committing rolls it back.

pub mod in_memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tokenledger_auth::GroupGrant;
use tokenledger_core::{AccountId, GroupName};
use tokenledger_ledger::{Account, LedgerEntry, NewAccount, NewEntry};

use crate::error::StoreError;

pub use in_memory::InMemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

/// Outcome of a balance adjustment inside a unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BalanceChange {
    /// Adjustment staged; `balance` is the account's balance after it.
    Applied { balance: i64 },
    /// Rejected: the balance would go negative. `balance` is unchanged.
    Insufficient { balance: i64 },
    /// Rejected: the balance would overflow.
    Overflow { balance: i64 },
}

/// Pagination parameters for entry-log reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(100).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

/// Which side of an entry an entry-log read matches on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryIndex {
    /// Entries whose source is the account.
    BySource,
    /// Entries whose destination is the account.
    ByCounterparty,
}

/// Durable ledger state: accounts, entry log and issuer authorization table.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Provision a new account with a zero balance.
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// Insert a grant; the (issuer, group, subject) triple is unique.
    async fn insert_grant(&self, grant: GroupGrant) -> Result<(), StoreError>;

    async fn grants_for(&self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError>;

    /// Open an atomic unit over the balances of `lock_set`.
    ///
    /// Implementations acquire per-account exclusion in ascending identity
    /// order regardless of the order given.
    async fn begin(&self, lock_set: &[AccountId]) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Open a consistent read-only view.
    async fn snapshot(&self) -> Result<Box<dyn LedgerSnapshot>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for std::sync::Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        (**self).create_account(account).await
    }

    async fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        (**self).account(id).await
    }

    async fn insert_grant(&self, grant: GroupGrant) -> Result<(), StoreError> {
        (**self).insert_grant(grant).await
    }

    async fn grants_for(&self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError> {
        (**self).grants_for(issuer).await
    }

    async fn begin(&self, lock_set: &[AccountId]) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin(lock_set).await
    }

    async fn snapshot(&self) -> Result<Box<dyn LedgerSnapshot>, StoreError> {
        (**self).snapshot().await
    }
}

/// One atomic unit of ledger mutation.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage `delta` on `account`'s balance, rejecting a negative result.
    async fn adjust_balance(&mut self, account: &AccountId, delta: i64) -> Result<BalanceChange, StoreError>;

    /// Stage an entry for the log.
    async fn append(&mut self, entry: NewEntry) -> Result<(), StoreError>;

    /// Make every staged change visible at once and return the sealed entries.
    async fn commit(self: Box<Self>) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Consistent, read-only view of the ledger.
#[async_trait]
pub trait LedgerSnapshot: Send {
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// Holders of `group`, balance descending, identity ascending on ties.
    async fn holders_in_group(&mut self, group: &GroupName) -> Result<Vec<Account>, StoreError>;

    /// Grants of `issuer`, ordered by (group, subject).
    async fn grants_for(&mut self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError>;

    /// One page of entries matching `index`, newest first.
    async fn entries(
        &mut self,
        index: EntryIndex,
        account: &AccountId,
        page: Pagination,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn entry_count(&mut self) -> Result<u64, StoreError>;
}

/// Lazy, finite walk over an entry index, one page at a time.
///
/// Restartable: [`EntryPages::restart`] rewinds to the first page. Entries
/// are never mutated by a read.
pub struct EntryPages<'s, S: LedgerSnapshot + ?Sized> {
    snapshot: &'s mut S,
    index: EntryIndex,
    account: AccountId,
    first: Pagination,
    page: Pagination,
    exhausted: bool,
}

impl<'s, S: LedgerSnapshot + ?Sized> EntryPages<'s, S> {
    pub fn new(snapshot: &'s mut S, index: EntryIndex, account: AccountId, page: Pagination) -> Self {
        Self {
            snapshot,
            index,
            account,
            first: page,
            page,
            exhausted: false,
        }
    }

    /// Fetch the next page; `None` once the index is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<LedgerEntry>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let entries = self.snapshot.entries(self.index, &self.account, self.page).await?;
        if (entries.len() as u32) < self.page.limit {
            self.exhausted = true;
        }
        self.page = self.page.next();
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(entries))
    }

    pub fn restart(&mut self) {
        self.page = self.first;
        self.exhausted = false;
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
