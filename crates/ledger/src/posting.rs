use serde::{Deserialize, Serialize};

use tokenledger_auth::{authorize_group, require_role, GroupGrant, Principal, Role};
use tokenledger_core::{AccountId, LedgerError, LedgerResult};

use crate::account::Account;
use crate::entry::{EntryKind, NewEntry};

/// One balance change inside a posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub account: AccountId,
    pub delta: i64,
}

/// The complete effect of one ledger operation: balance adjustments plus the
/// single entry that records them. A store applies a posting all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    adjustments: Vec<BalanceAdjustment>,
    entry: NewEntry,
}

impl Posting {
    /// Adjustments in application order (debits come first).
    pub fn adjustments(&self) -> &[BalanceAdjustment] {
        &self.adjustments
    }

    pub fn entry(&self) -> &NewEntry {
        &self.entry
    }

    /// Accounts whose balances this posting touches, in the global lock order.
    pub fn lock_set(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.adjustments.iter().map(|a| a.account.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn into_parts(self) -> (Vec<BalanceAdjustment>, NewEntry) {
        (self.adjustments, self.entry)
    }
}

/// Amount rule for issuance: any non-zero integer whose magnitude fits in an
/// `i64`, so every revocation has a representable requested amount.
pub fn check_issue_amount(amount: i64) -> LedgerResult<()> {
    if amount == 0 {
        return Err(LedgerError::invalid_amount("issued amount must not be zero"));
    }
    if amount == i64::MIN {
        return Err(LedgerError::invalid_amount("revoked amount is out of range"));
    }
    Ok(())
}

/// Amount a debit of `delta` asks for, as reported by `InsufficientFunds`.
pub fn requested_amount(delta: i64) -> LedgerResult<i64> {
    delta
        .checked_neg()
        .ok_or_else(|| LedgerError::invalid_amount("requested amount is out of range"))
}

/// Request-shape rules for a transfer, checked before any account is loaded.
pub fn check_transfer_request(sender: &AccountId, receiver: &AccountId, amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::invalid_amount("transfer amount must be positive"));
    }
    if sender == receiver {
        return Err(LedgerError::SameAccount);
    }
    Ok(())
}

/// The stored account must match the caller's identity and claimed role.
fn ensure_acting_account(principal: &Principal, account: &Account, role: Role) -> LedgerResult<()> {
    require_role(principal, role)?;
    if principal.identity() != &account.id || account.role != role {
        return Err(LedgerError::unauthorized(format!(
            "{} does not act as {} account {}",
            principal, role, account.id
        )));
    }
    Ok(())
}

fn projected_balance(account: &Account, delta: i64) -> LedgerResult<i64> {
    let next = account
        .balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::invalid_amount("balance would overflow"))?;
    if next < 0 {
        return Err(LedgerError::InsufficientFunds {
            account: account.id.clone(),
            balance: account.balance,
            requested: requested_amount(delta)?,
        });
    }
    Ok(next)
}

/// Plan an issuance (grant when `amount > 0`, revocation when `amount < 0`).
///
/// The balance check here runs against the caller's read of `holder`; the
/// store repeats it inside the atomic unit, which is authoritative.
pub fn plan_issue(
    principal: &Principal,
    issuer: &Account,
    grants: &[GroupGrant],
    holder: &Account,
    amount: i64,
) -> LedgerResult<Posting> {
    check_issue_amount(amount)?;
    ensure_acting_account(principal, issuer, Role::Issuer)?;

    if !holder.is_holder() {
        return Err(LedgerError::unauthorized(format!("{} is not a holder account", holder.id)));
    }
    let group = holder
        .group
        .as_ref()
        .ok_or_else(|| LedgerError::unauthorized(format!("{} has no group", holder.id)))?;
    authorize_group(principal, grants, group)?;

    projected_balance(holder, amount)?;

    Ok(Posting {
        adjustments: vec![BalanceAdjustment {
            account: holder.id.clone(),
            delta: amount,
        }],
        entry: NewEntry {
            kind: EntryKind::Issuance,
            source: issuer.id.clone(),
            destination: holder.id.clone(),
            amount,
        },
    })
}

/// Plan a revocation of a strictly positive `amount`.
pub fn plan_revoke(
    principal: &Principal,
    issuer: &Account,
    grants: &[GroupGrant],
    holder: &Account,
    amount: i64,
) -> LedgerResult<Posting> {
    if amount <= 0 {
        return Err(LedgerError::invalid_amount("revoked amount must be positive"));
    }
    plan_issue(principal, issuer, grants, holder, -amount)
}

/// Plan a holder-to-holder transfer.
pub fn plan_transfer(
    principal: &Principal,
    sender: &Account,
    receiver: &Account,
    amount: i64,
) -> LedgerResult<Posting> {
    check_transfer_request(&sender.id, &receiver.id, amount)?;
    ensure_acting_account(principal, sender, Role::Holder)?;

    if !receiver.is_holder() {
        return Err(LedgerError::not_found(&receiver.id));
    }

    projected_balance(sender, -amount)?;
    projected_balance(receiver, amount)?;

    Ok(Posting {
        adjustments: vec![
            BalanceAdjustment {
                account: sender.id.clone(),
                delta: -amount,
            },
            BalanceAdjustment {
                account: receiver.id.clone(),
                delta: amount,
            },
        ],
        entry: NewEntry {
            kind: EntryKind::Transfer,
            source: sender.id.clone(),
            destination: receiver.id.clone(),
            amount,
        },
    })
}
