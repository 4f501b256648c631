use serde::{Deserialize, Serialize};

use tokenledger_core::AccountId;

use crate::Role;

/// An authenticated caller, as supplied by the auth context.
///
/// Every ledger operation receives one of these explicitly; nothing in the
/// ledger reads identity from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    identity: AccountId,
    role: Role,
}

impl Principal {
    pub fn new(identity: AccountId, role: Role) -> Self {
        Self { identity, role }
    }

    pub fn holder(identity: AccountId) -> Self {
        Self::new(identity, Role::Holder)
    }

    pub fn issuer(identity: AccountId) -> Self {
        Self::new(identity, Role::Issuer)
    }

    pub fn identity(&self) -> &AccountId {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_issuer(&self) -> bool {
        self.role == Role::Issuer
    }
}

impl core::fmt::Display for Principal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.role, self.identity)
    }
}
