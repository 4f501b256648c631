use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tokenledger_core::{AccountId, EntrySeq};

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// An issuer granted (positive) or revoked (negative) tokens.
    Issuance,
    /// A holder moved tokens to another holder.
    Transfer,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Issuance => "issuance",
            EntryKind::Transfer => "transfer",
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issuance" => Ok(EntryKind::Issuance),
            "transfer" => Ok(EntryKind::Transfer),
            other => Err(format!("unknown entry kind '{other}'")),
        }
    }
}

/// An entry ready to be appended (sequence number and timestamp not yet assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub source: AccountId,
    pub destination: AccountId,
    /// Issuance: signed (negative = revocation). Transfer: strictly positive.
    pub amount: i64,
}

/// An immutable, committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: EntrySeq,
    pub kind: EntryKind,
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Seal a new entry with its store-assigned position and commit time.
    pub fn commit(entry: NewEntry, seq: EntrySeq, created_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            kind: entry.kind,
            source: entry.source,
            destination: entry.destination,
            amount: entry.amount,
            created_at,
        }
    }

    /// Signed change this entry applied to `account`'s balance.
    ///
    /// Issuers never carry a balance, so the source side of an issuance has
    /// no effect.
    pub fn signed_effect(&self, account: &AccountId) -> i64 {
        let mut effect = 0;
        if &self.destination == account {
            effect += self.amount;
        }
        if self.kind == EntryKind::Transfer && &self.source == account {
            effect -= self.amount;
        }
        effect
    }

    /// Whether `account` is the source or destination of this entry.
    pub fn involves(&self, account: &AccountId) -> bool {
        &self.source == account || &self.destination == account
    }
}

/// Rebuild an account's balance from the entries that reference it.
pub fn reconstruct_balance<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    account: &AccountId,
) -> i64 {
    entries.into_iter().map(|e| e.signed_effect(account)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::parse(s).unwrap()
    }

    fn entry(seq: u64, kind: EntryKind, source: &str, destination: &str, amount: i64) -> LedgerEntry {
        LedgerEntry::commit(
            NewEntry {
                kind,
                source: id(source),
                destination: id(destination),
                amount,
            },
            EntrySeq::new(seq),
            Utc::now(),
        )
    }

    #[test]
    fn balance_is_rebuilt_from_signed_effects() {
        let entries = vec![
            entry(1, EntryKind::Issuance, "prof", "a", 100),
            entry(2, EntryKind::Transfer, "a", "b", 30),
            entry(3, EntryKind::Issuance, "prof", "a", -20),
            entry(4, EntryKind::Transfer, "b", "a", 5),
        ];

        assert_eq!(reconstruct_balance(&entries, &id("a")), 55);
        assert_eq!(reconstruct_balance(&entries, &id("b")), 25);
        assert_eq!(reconstruct_balance(&entries, &id("prof")), 0);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [EntryKind::Issuance, EntryKind::Transfer] {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("mint".parse::<EntryKind>().is_err());
    }

    #[test]
    fn entries_serialize_with_lowercase_kind() {
        let json = serde_json::to_value(entry(7, EntryKind::Issuance, "prof", "a", -3)).unwrap();
        assert_eq!(json["kind"], "issuance");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["amount"], -3);
    }
}
