use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};

use tokenledger_auth::GroupGrant;
use tokenledger_core::{AccountId, EntrySeq, GroupName};
use tokenledger_ledger::{Account, LedgerEntry, NewAccount, NewEntry};

use super::{BalanceChange, EntryIndex, LedgerSnapshot, LedgerStore, Pagination, UnitOfWork};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
    grants: BTreeSet<GroupGrant>,
    last_seq: u64,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Balances and the entry log share one `RwLock`
/// so a reader never sees one without the other. Check-then-act on a
/// balance is serialized by a per-account mutex, acquired in ascending
/// identity order, so units over disjoint accounts run independently and
/// units over the same accounts cannot deadlock.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    account_locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_handles(&self, ids: &[AccountId]) -> Result<Vec<Arc<AsyncMutex<()>>>, StoreError> {
        let mut registry = self
            .account_locks
            .lock()
            .map_err(|_| StoreError::Backend("account lock registry poisoned".to_string()))?;
        Ok(ids
            .iter()
            .map(|id| registry.entry(id.clone()).or_default().clone())
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::AccountExists(account.id));
        }
        let account = account.into_account();
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().await.accounts.get(id).cloned())
    }

    async fn insert_grant(&self, grant: GroupGrant) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&grant.issuer) {
            return Err(StoreError::UnknownAccount(grant.issuer));
        }
        if state.grants.contains(&grant) {
            return Err(StoreError::DuplicateGrant(grant));
        }
        state.grants.insert(grant);
        Ok(())
    }

    async fn grants_for(&self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError> {
        let state = self.state.read().await;
        Ok(grants_of(&state, issuer))
    }

    async fn begin(&self, lock_set: &[AccountId]) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut ordered: Vec<AccountId> = lock_set.to_vec();
        ordered.sort();
        ordered.dedup();

        let handles = self.lock_handles(&ordered)?;
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }

        Ok(Box::new(InMemoryUnit {
            state: self.state.clone(),
            _guards: guards,
            locked: ordered.into_iter().collect(),
            deltas: BTreeMap::new(),
            entries: Vec::new(),
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn LedgerSnapshot>, StoreError> {
        let guard = self.state.clone().read_owned().await;
        Ok(Box::new(InMemorySnapshot { state: guard }))
    }
}

fn grants_of(state: &LedgerState, issuer: &AccountId) -> Vec<GroupGrant> {
    state
        .grants
        .iter()
        .filter(|g| &g.issuer == issuer)
        .cloned()
        .collect()
}

struct InMemoryUnit {
    state: Arc<RwLock<LedgerState>>,
    _guards: Vec<OwnedMutexGuard<()>>,
    locked: BTreeSet<AccountId>,
    deltas: BTreeMap<AccountId, i64>,
    entries: Vec<NewEntry>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn adjust_balance(&mut self, account: &AccountId, delta: i64) -> Result<BalanceChange, StoreError> {
        if !self.locked.contains(account) {
            return Err(StoreError::NotLocked(account.clone()));
        }

        let stored = {
            let state = self.state.read().await;
            state
                .accounts
                .get(account)
                .map(|a| a.balance)
                .ok_or_else(|| StoreError::UnknownAccount(account.clone()))?
        };
        let staged = self.deltas.get(account).copied().unwrap_or(0);
        let current = stored + staged;

        let Some(next) = current.checked_add(delta) else {
            return Ok(BalanceChange::Overflow { balance: current });
        };
        if next < 0 {
            return Ok(BalanceChange::Insufficient { balance: current });
        }

        self.deltas.insert(account.clone(), staged + delta);
        Ok(BalanceChange::Applied { balance: next })
    }

    async fn append(&mut self, entry: NewEntry) -> Result<(), StoreError> {
        self.entries.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<Vec<LedgerEntry>, StoreError> {
        let unit = *self;
        let mut state = unit.state.write().await;

        // Validate everything before touching anything.
        for (id, delta) in &unit.deltas {
            let account = state
                .accounts
                .get(id)
                .ok_or_else(|| StoreError::UnknownAccount(id.clone()))?;
            if !account.balance.checked_add(*delta).is_some_and(|next| next >= 0) {
                return Err(StoreError::Corrupt(format!(
                    "balance of {id} changed outside its lock"
                )));
            }
        }

        for (id, delta) in &unit.deltas {
            if let Some(account) = state.accounts.get_mut(id) {
                account.balance += delta;
            }
        }

        let committed_at = Utc::now();
        let mut committed = Vec::with_capacity(unit.entries.len());
        for entry in unit.entries {
            state.last_seq += 1;
            let sealed = LedgerEntry::commit(entry, EntrySeq::new(state.last_seq), committed_at);
            state.entries.push(sealed.clone());
            committed.push(sealed);
        }

        Ok(committed)
    }
}

struct InMemorySnapshot {
    state: OwnedRwLockReadGuard<LedgerState>,
}

#[async_trait]
impl LedgerSnapshot for InMemorySnapshot {
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.state.accounts.get(id).cloned())
    }

    async fn holders_in_group(&mut self, group: &GroupName) -> Result<Vec<Account>, StoreError> {
        let mut holders: Vec<Account> = self
            .state
            .accounts
            .values()
            .filter(|a| a.is_holder() && a.group.as_ref() == Some(group))
            .cloned()
            .collect();
        holders.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)));
        Ok(holders)
    }

    async fn grants_for(&mut self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError> {
        Ok(grants_of(&self.state, issuer))
    }

    async fn entries(
        &mut self,
        index: EntryIndex,
        account: &AccountId,
        page: Pagination,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .state
            .entries
            .iter()
            .rev()
            .filter(|e| match index {
                EntryIndex::BySource => &e.source == account,
                EntryIndex::ByCounterparty => &e.destination == account,
            })
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn entry_count(&mut self) -> Result<u64, StoreError> {
        Ok(self.state.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryPages;
    use tokenledger_ledger::EntryKind;

    fn id(s: &str) -> AccountId {
        AccountId::parse(s).unwrap()
    }

    async fn store_with_holders() -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        for name in ["a", "b"] {
            store
                .create_account(NewAccount::holder(id(name), name, GroupName::parse("3A").unwrap()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn dropped_unit_leaves_no_trace() {
        let store = store_with_holders().await;
        {
            let mut unit = store.begin(&[id("a")]).await.unwrap();
            assert_eq!(
                unit.adjust_balance(&id("a"), 10).await.unwrap(),
                BalanceChange::Applied { balance: 10 }
            );
            unit.append(NewEntry {
                kind: EntryKind::Issuance,
                source: id("prof"),
                destination: id("a"),
                amount: 10,
            })
            .await
            .unwrap();
        }

        assert_eq!(store.account(&id("a")).await.unwrap().unwrap().balance, 0);
        assert_eq!(store.snapshot().await.unwrap().entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn adjust_rejects_negative_and_unlocked_accounts() {
        let store = store_with_holders().await;
        let mut unit = store.begin(&[id("a")]).await.unwrap();

        assert_eq!(
            unit.adjust_balance(&id("a"), -1).await.unwrap(),
            BalanceChange::Insufficient { balance: 0 }
        );
        assert!(matches!(
            unit.adjust_balance(&id("b"), 1).await,
            Err(StoreError::NotLocked(_))
        ));
    }

    #[tokio::test]
    async fn adjust_reports_overflow_against_staged_balance() {
        let store = store_with_holders().await;
        let mut unit = store.begin(&[id("a")]).await.unwrap();

        unit.adjust_balance(&id("a"), 5).await.unwrap();
        assert_eq!(
            unit.adjust_balance(&id("a"), i64::MAX).await.unwrap(),
            BalanceChange::Overflow { balance: 5 }
        );
        assert_eq!(
            unit.adjust_balance(&id("a"), i64::MIN).await.unwrap(),
            BalanceChange::Insufficient { balance: 5 }
        );
    }

    #[tokio::test]
    async fn entries_are_stamped_at_commit() {
        let store = store_with_holders().await;
        let mut unit = store.begin(&[id("a")]).await.unwrap();
        unit.adjust_balance(&id("a"), 3).await.unwrap();
        unit.append(NewEntry {
            kind: EntryKind::Issuance,
            source: id("prof"),
            destination: id("a"),
            amount: 3,
        })
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let before_commit = Utc::now();
        let committed = unit.commit().await.unwrap();
        assert!(committed[0].created_at >= before_commit);
    }

    #[tokio::test]
    async fn commit_assigns_increasing_sequence_numbers() {
        let store = store_with_holders().await;
        for expected in 1..=3u64 {
            let mut unit = store.begin(&[id("a")]).await.unwrap();
            unit.adjust_balance(&id("a"), 5).await.unwrap();
            unit.append(NewEntry {
                kind: EntryKind::Issuance,
                source: id("prof"),
                destination: id("a"),
                amount: 5,
            })
            .await
            .unwrap();
            let committed = unit.commit().await.unwrap();
            assert_eq!(committed[0].seq, EntrySeq::new(expected));
        }
        assert_eq!(store.account(&id("a")).await.unwrap().unwrap().balance, 15);
    }

    #[tokio::test]
    async fn duplicate_accounts_and_grants_are_rejected() {
        let store = store_with_holders().await;
        let err = store
            .create_account(NewAccount::holder(id("a"), "again", GroupName::parse("3A").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AccountExists(_)));

        store.create_account(NewAccount::issuer(id("prof"), "Prof")).await.unwrap();
        let grant = GroupGrant::new(
            id("prof"),
            GroupName::parse("3A").unwrap(),
            tokenledger_core::SubjectName::parse("art").unwrap(),
        );
        store.insert_grant(grant.clone()).await.unwrap();
        assert!(matches!(
            store.insert_grant(grant).await,
            Err(StoreError::DuplicateGrant(_))
        ));
    }

    #[tokio::test]
    async fn entry_pages_walk_newest_first_and_restart() {
        let store = store_with_holders().await;
        for amount in 1..=5 {
            let mut unit = store.begin(&[id("a")]).await.unwrap();
            unit.adjust_balance(&id("a"), amount).await.unwrap();
            unit.append(NewEntry {
                kind: EntryKind::Issuance,
                source: id("prof"),
                destination: id("a"),
                amount,
            })
            .await
            .unwrap();
            unit.commit().await.unwrap();
        }

        let mut snapshot = store.snapshot().await.unwrap();
        let mut pages = EntryPages::new(
            snapshot.as_mut(),
            EntryIndex::ByCounterparty,
            id("a"),
            Pagination::new(Some(2), None),
        );

        let amounts = |page: Vec<LedgerEntry>| page.iter().map(|e| e.amount).collect::<Vec<_>>();
        assert_eq!(amounts(pages.next_page().await.unwrap().unwrap()), vec![5, 4]);
        assert_eq!(amounts(pages.next_page().await.unwrap().unwrap()), vec![3, 2]);
        assert_eq!(amounts(pages.next_page().await.unwrap().unwrap()), vec![1]);
        assert!(pages.next_page().await.unwrap().is_none());

        pages.restart();
        assert_eq!(amounts(pages.next_page().await.unwrap().unwrap()), vec![5, 4]);
        assert_eq!(pages.collect_all().await.unwrap().len(), 3);
    }

    #[test]
    fn pagination_limit_is_capped() {
        assert_eq!(Pagination::new(Some(50_000), None).limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::new(Some(0), Some(3)), Pagination { limit: 1, offset: 3 });
        assert_eq!(Pagination::new(None, None), Pagination::default());
    }
}
