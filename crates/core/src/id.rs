//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Identity of an account (holder or issuer).
///
/// Stable, unique string key supplied by the registration collaborator
/// (typically an e-mail address).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

/// Name of a holder group (class / section).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

/// Subject an issuer teaches within a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap a raw identifier.
            ///
            /// Surrounding whitespace is trimmed; an empty result is rejected.
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, LedgerError> {
                let trimmed = raw.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(LedgerError::invalid_id(format!("{} must not be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(AccountId, "AccountId");
impl_string_newtype!(GroupName, "GroupName");
impl_string_newtype!(SubjectName, "SubjectName");

/// Position of an entry in the ledger entry log.
///
/// Assigned by the store at commit time; strictly increasing in commit order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrySeq(u64);

impl EntrySeq {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for EntrySeq {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_rejects_blank() {
        let id = AccountId::parse("  alice@school.test ").unwrap();
        assert_eq!(id.as_str(), "alice@school.test");

        let err = GroupName::parse("   ").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidId(msg) if msg.contains("GroupName")));
    }

    #[test]
    fn ids_order_lexicographically() {
        let a: AccountId = "a@x".parse().unwrap();
        let b: AccountId = "b@x".parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn serializes_transparently() {
        let id = AccountId::parse("carol@x").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"carol@x\"");
        assert_eq!(serde_json::to_string(&EntrySeq::new(7)).unwrap(), "7");
    }
}
