//! Transfer engine: the ledger's sole writer.
//!
//! Every mutating operation runs the same pipeline:
//!
//! ```text
//! request
//!   ↓
//! 1. Shape checks (amount, self-transfer, role); no IO
//!   ↓
//! 2. Load accounts + issuer grants (NotFound / Unauthorized)
//!   ↓
//! 3. Plan the posting (pure; see tokenledger_ledger::posting)
//!   ↓
//! 4. Apply inside one unit: adjust balances (re-checked atomically), append the entry, commit
//! ```
//!
//! A rejection at any step leaves the store untouched: the unit is dropped,
//! which rolls it back. Retryable store failures re-run steps 2-4 according
//! to the engine's [`RetryPolicy`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use tokenledger_auth::{require_role, GroupGrant, Principal, Role};
use tokenledger_core::{AccountId, GroupName, LedgerError, SubjectName};
use tokenledger_ledger::{
    check_issue_amount, check_transfer_request, plan_issue, plan_revoke, plan_transfer, requested_amount,
    Account, LedgerEntry, NewAccount, Posting,
};

use crate::config::{LedgerConfig, RetryPolicy};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::store::{BalanceChange, LedgerStore};

/// Result of a successful issuance or revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReceipt {
    pub entry: LedgerEntry,
    pub new_balance: i64,
}

/// Result of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub entry: LedgerEntry,
    pub sender_balance: i64,
    pub receiver_balance: i64,
}

struct Applied {
    entry: LedgerEntry,
    balances: Vec<i64>,
}

#[derive(Debug)]
pub struct TransferEngine<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> TransferEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Engine over `store` retrying per `config.retry`.
    pub fn from_config(store: S, config: &LedgerConfig) -> Self {
        Self::new(store).with_retry(config.retry)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> TransferEngine<S>
where
    S: LedgerStore,
{
    /// Provision an account with a zero balance.
    #[instrument(skip(self, account), fields(account = %account.id, role = %account.role), err)]
    pub async fn open_account(&self, account: NewAccount) -> EngineResult<Account> {
        account.validate()?;
        let created = self.store.create_account(account).await?;
        tracing::info!(account = %created.id, "account opened");
        Ok(created)
    }

    /// Authorize the calling issuer over `(group, subject)`.
    ///
    /// The triple is unique; registering it twice fails with `DuplicateGrant`.
    #[instrument(skip(self, principal), fields(issuer = %principal.identity()), err)]
    pub async fn register_group(
        &self,
        principal: &Principal,
        group: GroupName,
        subject: SubjectName,
    ) -> EngineResult<GroupGrant> {
        require_role(principal, Role::Issuer)?;
        let issuer = self.load(principal.identity()).await?;
        if !issuer.is_issuer() {
            return Err(LedgerError::unauthorized(format!("{} is not an issuer account", issuer.id)).into());
        }

        let grant = GroupGrant::new(issuer.id, group, subject);
        self.store.insert_grant(grant.clone()).await?;
        tracing::info!("group registered");
        Ok(grant)
    }

    /// Grant (`amount > 0`) or revoke (`amount < 0`) tokens for `holder`.
    #[instrument(skip(self, principal), fields(issuer = %principal.identity()), err)]
    pub async fn issue(&self, principal: &Principal, holder: &AccountId, amount: i64) -> EngineResult<IssueReceipt> {
        check_issue_amount(amount)?;
        require_role(principal, Role::Issuer)?;

        self.run_retrying("issue", move || async move {
            let (issuer, target, grants) = self.load_issue_parties(principal, holder).await?;
            let posting = plan_issue(principal, &issuer, &grants, &target, amount)?;
            self.apply(posting).await
        })
        .await
        .map(into_issue_receipt)
    }

    /// Take back a strictly positive `amount` from `holder`.
    #[instrument(skip(self, principal), fields(issuer = %principal.identity()), err)]
    pub async fn revoke(&self, principal: &Principal, holder: &AccountId, amount: i64) -> EngineResult<IssueReceipt> {
        if amount <= 0 {
            return Err(LedgerError::invalid_amount("revoked amount must be positive").into());
        }
        require_role(principal, Role::Issuer)?;

        self.run_retrying("revoke", move || async move {
            let (issuer, target, grants) = self.load_issue_parties(principal, holder).await?;
            let posting = plan_revoke(principal, &issuer, &grants, &target, amount)?;
            self.apply(posting).await
        })
        .await
        .map(into_issue_receipt)
    }

    /// Move `amount` tokens from the calling holder to `receiver`.
    #[instrument(skip(self, principal), fields(sender = %principal.identity()), err)]
    pub async fn transfer(
        &self,
        principal: &Principal,
        receiver: &AccountId,
        amount: i64,
    ) -> EngineResult<TransferReceipt> {
        check_transfer_request(principal.identity(), receiver, amount)?;
        require_role(principal, Role::Holder)?;

        let applied = self
            .run_retrying("transfer", move || async move {
                let sender = self.load(principal.identity()).await?;
                let target = self.load(receiver).await?;
                let posting = plan_transfer(principal, &sender, &target, amount)?;
                self.apply(posting).await
            })
            .await?;

        match applied.balances.as_slice() {
            [sender_balance, receiver_balance] => Ok(TransferReceipt {
                sender_balance: *sender_balance,
                receiver_balance: *receiver_balance,
                entry: applied.entry,
            }),
            other => Err(EngineError::Store(StoreError::Corrupt(format!(
                "transfer applied {} balance adjustments",
                other.len()
            )))),
        }
    }

    async fn load(&self, id: &AccountId) -> EngineResult<Account> {
        self.store
            .account(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(id).into())
    }

    async fn load_issue_parties(
        &self,
        principal: &Principal,
        holder: &AccountId,
    ) -> EngineResult<(Account, Account, Vec<GroupGrant>)> {
        let issuer = self.load(principal.identity()).await?;
        let target = self.load(holder).await?;
        let grants = self.store.grants_for(&issuer.id).await?;
        Ok((issuer, target, grants))
    }

    /// Apply a posting as one unit. Returning early drops the unit, which
    /// rolls it back.
    async fn apply(&self, posting: Posting) -> EngineResult<Applied> {
        let lock_set = posting.lock_set();
        let (adjustments, entry) = posting.into_parts();

        let mut unit = self.store.begin(&lock_set).await?;
        let mut balances = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            match unit.adjust_balance(&adjustment.account, adjustment.delta).await? {
                BalanceChange::Applied { balance } => balances.push(balance),
                BalanceChange::Insufficient { balance } => {
                    return Err(LedgerError::InsufficientFunds {
                        account: adjustment.account,
                        balance,
                        requested: requested_amount(adjustment.delta)?,
                    }
                    .into());
                }
                BalanceChange::Overflow { .. } => {
                    return Err(LedgerError::invalid_amount(format!(
                        "balance of {} would overflow",
                        adjustment.account
                    ))
                    .into());
                }
            }
        }
        unit.append(entry).await?;

        let mut committed = unit.commit().await?;
        let entry = committed
            .pop()
            .ok_or_else(|| StoreError::Corrupt("commit returned no entry".to_string()))?;

        tracing::info!(
            seq = entry.seq.get(),
            kind = entry.kind.as_str(),
            source = %entry.source,
            destination = %entry.destination,
            amount = entry.amount,
            "entry committed"
        );
        Ok(Applied { entry, balances })
    }

    async fn run_retrying<T, F, Fut>(&self, operation: &'static str, mut run: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match run().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store failure; retrying unit"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(EngineError::Domain(e)) => {
                    tracing::debug!(operation, error = %e, "operation rejected");
                    return Err(EngineError::Domain(e));
                }
                Err(e) => {
                    tracing::error!(operation, attempts = attempt + 1, error = %e, "store failure");
                    return Err(e);
                }
            }
        }
    }
}

fn into_issue_receipt(applied: Applied) -> IssueReceipt {
    IssueReceipt {
        new_balance: applied.balances.first().copied().unwrap_or_default(),
        entry: applied.entry,
    }
}
