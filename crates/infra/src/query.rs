//! Read-only views over accounts and the entry log.
//!
//! Each query opens one [`LedgerSnapshot`] and answers entirely from it, so a
//! balance is never shown without the entries that produced it. Snapshots
//! are released before a query returns.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use chrono::{DateTime, Utc};
use tokenledger_auth::{authorize_group, authorize_view_group, require_role, GroupGrant, Principal, Role};
use tokenledger_core::{AccountId, EntrySeq, GroupName, LedgerError, SubjectName};
use tokenledger_ledger::{reconstruct_balance, Account, EntryKind, LedgerEntry};

use crate::error::EngineResult;
use crate::store::{EntryIndex, EntryPages, LedgerSnapshot, LedgerStore, Pagination};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub identity: AccountId,
    pub display_name: String,
    pub balance: i64,
}

impl From<Account> for LeaderboardRow {
    fn from(account: Account) -> Self {
        Self {
            identity: account.id,
            display_name: account.display_name,
            balance: account.balance,
        }
    }
}

/// One statement line, seen from the holder's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub seq: EntrySeq,
    pub kind: EntryKind,
    /// The other party: the issuer for issuances, the peer holder for transfers.
    pub counterparty: AccountId,
    /// Signed effect on the holder's balance.
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub holder: AccountId,
    pub display_name: String,
    pub balance: i64,
    /// Newest first.
    pub lines: Vec<StatementLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerHistoryLine {
    pub seq: EntrySeq,
    pub holder: AccountId,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterGroup {
    pub group: GroupName,
    pub subject: SubjectName,
    /// Balance descending, identity ascending on ties.
    pub holders: Vec<LeaderboardRow>,
}

/// Stored balance next to the balance rebuilt from the entry log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account: AccountId,
    pub stored_balance: i64,
    pub derived_balance: i64,
    pub entry_count: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.derived_balance
    }
}

#[derive(Debug)]
pub struct QueryService<S> {
    store: S,
}

impl<S> QueryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> QueryService<S>
where
    S: LedgerStore,
{
    /// Holders of `group`, balance descending, identity ascending on ties.
    ///
    /// Visible to holders of the group and to issuers registered for it.
    #[instrument(skip(self, principal), fields(caller = %principal), err)]
    pub async fn leaderboard(&self, principal: &Principal, group: &GroupName) -> EngineResult<Vec<LeaderboardRow>> {
        let mut snapshot = self.store.snapshot().await?;
        let viewer = Viewer::load(snapshot.as_mut(), principal).await?;
        authorize_view_group(principal, viewer.group.as_ref(), &viewer.grants, group)?;

        let holders = snapshot.holders_in_group(group).await?;
        Ok(holders.into_iter().map(LeaderboardRow::from).collect())
    }

    /// The holder's entries, newest first, with its current balance.
    ///
    /// Visible to the holder itself and to issuers registered for its group.
    #[instrument(skip(self, principal), fields(caller = %principal), err)]
    pub async fn statement(&self, principal: &Principal, holder: &AccountId) -> EngineResult<Statement> {
        let mut snapshot = self.store.snapshot().await?;
        let account = load_visible_holder(snapshot.as_mut(), principal, holder).await?;
        let entries = holder_entries(snapshot.as_mut(), &account.id).await?;

        let lines = entries
            .iter()
            .map(|entry| StatementLine {
                seq: entry.seq,
                kind: entry.kind,
                counterparty: if entry.destination == account.id {
                    entry.source.clone()
                } else {
                    entry.destination.clone()
                },
                amount: entry.signed_effect(&account.id),
                timestamp: entry.created_at,
            })
            .collect();

        Ok(Statement {
            holder: account.id,
            display_name: account.display_name,
            balance: account.balance,
            lines,
        })
    }

    /// Issuances made by the calling issuer, newest first.
    #[instrument(skip(self, principal), fields(caller = %principal), err)]
    pub async fn issuer_history(&self, principal: &Principal) -> EngineResult<Vec<IssuerHistoryLine>> {
        require_role(principal, Role::Issuer)?;
        let mut snapshot = self.store.snapshot().await?;
        Viewer::load(snapshot.as_mut(), principal).await?;

        let entries = EntryPages::new(
            snapshot.as_mut(),
            EntryIndex::BySource,
            principal.identity().clone(),
            Pagination::new(Some(Pagination::MAX_LIMIT), None),
        )
        .collect_all()
        .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.kind == EntryKind::Issuance)
            .map(|e| IssuerHistoryLine {
                seq: e.seq,
                holder: e.destination,
                amount: e.amount,
                timestamp: e.created_at,
            })
            .collect())
    }

    /// Every (group, subject) the calling issuer is registered for, each with
    /// the group's holders.
    #[instrument(skip(self, principal), fields(caller = %principal), err)]
    pub async fn group_roster(&self, principal: &Principal) -> EngineResult<Vec<RosterGroup>> {
        require_role(principal, Role::Issuer)?;
        let mut snapshot = self.store.snapshot().await?;
        let viewer = Viewer::load(snapshot.as_mut(), principal).await?;

        let mut roster = Vec::with_capacity(viewer.grants.len());
        for GroupGrant { group, subject, .. } in viewer.grants {
            let holders = snapshot.holders_in_group(&group).await?;
            roster.push(RosterGroup {
                group,
                subject,
                holders: holders.into_iter().map(LeaderboardRow::from).collect(),
            });
        }
        Ok(roster)
    }

    /// Rebuild `holder`'s balance from the log and compare with the stored one.
    #[instrument(skip(self, principal), fields(caller = %principal), err)]
    pub async fn reconcile(&self, principal: &Principal, holder: &AccountId) -> EngineResult<Reconciliation> {
        let mut snapshot = self.store.snapshot().await?;
        let account = load_visible_holder(snapshot.as_mut(), principal, holder).await?;
        let entries = holder_entries(snapshot.as_mut(), &account.id).await?;

        let reconciliation = Reconciliation {
            derived_balance: reconstruct_balance(&entries, &account.id),
            stored_balance: account.balance,
            entry_count: entries.len(),
            account: account.id,
        };
        if !reconciliation.is_consistent() {
            tracing::error!(
                account = %reconciliation.account,
                stored = reconciliation.stored_balance,
                derived = reconciliation.derived_balance,
                "stored balance disagrees with entry log"
            );
        }
        Ok(reconciliation)
    }

    /// Total number of committed entries.
    pub async fn entry_count(&self) -> EngineResult<u64> {
        let mut snapshot = self.store.snapshot().await?;
        Ok(snapshot.entry_count().await?)
    }
}

/// The caller as stored: its own group (holders) or its grants (issuers).
struct Viewer {
    group: Option<GroupName>,
    grants: Vec<GroupGrant>,
}

impl Viewer {
    async fn load(snapshot: &mut dyn LedgerSnapshot, principal: &Principal) -> EngineResult<Self> {
        let account = snapshot
            .account(principal.identity())
            .await?
            .ok_or_else(|| LedgerError::unauthorized(format!("{} has no account", principal.identity())))?;
        if account.role != principal.role() {
            return Err(LedgerError::unauthorized(format!(
                "{} is not a {} account",
                account.id,
                principal.role()
            ))
            .into());
        }

        match principal.role() {
            Role::Holder => Ok(Self {
                group: account.group,
                grants: Vec::new(),
            }),
            Role::Issuer => Ok(Self {
                group: None,
                grants: snapshot.grants_for(&account.id).await?,
            }),
        }
    }
}

async fn load_visible_holder(
    snapshot: &mut dyn LedgerSnapshot,
    principal: &Principal,
    holder: &AccountId,
) -> EngineResult<Account> {
    let account = snapshot
        .account(holder)
        .await?
        .filter(Account::is_holder)
        .ok_or_else(|| LedgerError::not_found(holder))?;

    match principal.role() {
        Role::Holder if principal.identity() == &account.id => Ok(account),
        Role::Holder => Err(LedgerError::unauthorized(format!(
            "{} cannot view the statement of {}",
            principal.identity(),
            account.id
        ))
        .into()),
        Role::Issuer => {
            let viewer = Viewer::load(snapshot, principal).await?;
            let group = account
                .group
                .as_ref()
                .ok_or_else(|| LedgerError::unauthorized(format!("{} has no group", account.id)))?;
            authorize_group(principal, &viewer.grants, group)?;
            Ok(account)
        }
    }
}

/// Entries crediting the holder plus transfers it sent, newest first.
async fn holder_entries(snapshot: &mut dyn LedgerSnapshot, holder: &AccountId) -> EngineResult<Vec<LedgerEntry>> {
    let page = Pagination::new(Some(Pagination::MAX_LIMIT), None);
    let mut entries = EntryPages::new(&mut *snapshot, EntryIndex::ByCounterparty, holder.clone(), page)
        .collect_all()
        .await?;
    let sent = EntryPages::new(&mut *snapshot, EntryIndex::BySource, holder.clone(), page)
        .collect_all()
        .await?;
    entries.extend(sent.into_iter().filter(|e| e.kind == EntryKind::Transfer));

    entries.sort_by(|a, b| b.seq.cmp(&a.seq));
    entries.dedup_by_key(|e| e.seq);
    Ok(entries)
}
