use serde::{Deserialize, Serialize};

use tokenledger_auth::Role;
use tokenledger_core::{AccountId, GroupName, LedgerError, LedgerResult};

/// A balance-bearing account as stored.
///
/// Issuer accounts carry no group and their balance stays at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub role: Role,
    pub group: Option<GroupName>,
    pub balance: i64,
}

impl Account {
    pub fn is_holder(&self) -> bool {
        self.role == Role::Holder
    }

    pub fn is_issuer(&self) -> bool {
        self.role == Role::Issuer
    }
}

/// Provisioning request for a new account (balance always starts at zero).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub id: AccountId,
    pub display_name: String,
    pub role: Role,
    pub group: Option<GroupName>,
}

impl NewAccount {
    pub fn holder(id: AccountId, display_name: impl Into<String>, group: GroupName) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role: Role::Holder,
            group: Some(group),
        }
    }

    pub fn issuer(id: AccountId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role: Role::Issuer,
            group: None,
        }
    }

    /// Holders belong to exactly one group; issuers to none.
    pub fn validate(&self) -> LedgerResult<()> {
        match (self.role, &self.group) {
            (Role::Holder, None) => Err(LedgerError::invalid_id("holder accounts require a group")),
            (Role::Issuer, Some(_)) => Err(LedgerError::invalid_id("issuer accounts cannot join a group")),
            _ => Ok(()),
        }
    }

    pub fn into_account(self) -> Account {
        Account {
            id: self.id,
            display_name: self.display_name,
            role: self.role,
            group: self.group,
            balance: 0,
        }
    }
}
