use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role tag carried by every account.
///
/// Holders own a spendable balance; issuers grant and revoke tokens for the
/// groups they are registered for and never hold a balance themselves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Holder,
    Issuer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Holder => "holder",
            Role::Issuer => "issuer",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holder" => Ok(Role::Holder),
            "issuer" => Ok(Role::Issuer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}
