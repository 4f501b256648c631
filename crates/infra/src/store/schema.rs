//! SQLite schema and row types.
//!
//! The migration is idempotent; every statement is `IF NOT EXISTS`.

use chrono::{DateTime, Utc};

use tokenledger_auth::{GroupGrant, Role};
use tokenledger_core::{AccountId, EntrySeq, GroupName, SubjectName};
use tokenledger_ledger::{Account, EntryKind, LedgerEntry};

use crate::error::StoreError;

pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        identity     TEXT PRIMARY KEY NOT NULL CHECK (length(trim(identity)) > 0),
        display_name TEXT NOT NULL,
        role         TEXT NOT NULL CHECK (role IN ('holder', 'issuer')),
        group_name   TEXT NULL,
        balance      INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at   TEXT NOT NULL,
        CHECK ((role = 'holder' AND group_name IS NOT NULL)
            OR (role = 'issuer' AND group_name IS NULL AND balance = 0))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS accounts_group_balance
        ON accounts (group_name, balance DESC, identity ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        kind        TEXT NOT NULL CHECK (kind IN ('issuance', 'transfer')),
        source      TEXT NOT NULL REFERENCES accounts (identity),
        destination TEXT NOT NULL REFERENCES accounts (identity),
        amount      INTEGER NOT NULL CHECK (amount <> 0),
        created_at  TEXT NOT NULL,
        CHECK (kind = 'issuance' OR amount > 0)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS entries_source ON entries (source, seq DESC)",
    "CREATE INDEX IF NOT EXISTS entries_destination ON entries (destination, seq DESC)",
    r#"
    CREATE TRIGGER IF NOT EXISTS entries_immutable_update
    BEFORE UPDATE ON entries
    BEGIN
        SELECT RAISE(ABORT, 'ledger entries are immutable');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS entries_immutable_delete
    BEFORE DELETE ON entries
    BEGIN
        SELECT RAISE(ABORT, 'ledger entries are immutable');
    END
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_grants (
        issuer     TEXT NOT NULL REFERENCES accounts (identity),
        group_name TEXT NOT NULL,
        subject    TEXT NOT NULL,
        PRIMARY KEY (issuer, group_name, subject)
    )
    "#,
];

/// Row type for table `accounts`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub identity: String,
    pub display_name: String,
    pub role: String,
    pub group_name: Option<String>,
    pub balance: i64,
}

/// Row type for table `entries`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRow {
    pub seq: i64,
    pub kind: String,
    pub source: String,
    pub destination: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Row type for table `group_grants`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GrantRow {
    pub issuer: String,
    pub group_name: String,
    pub subject: String,
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::parse(&row.identity).map_err(|e| corrupt("accounts.identity", e))?,
            display_name: row.display_name,
            role: row.role.parse::<Role>().map_err(|e| corrupt("accounts.role", e))?,
            group: row
                .group_name
                .map(GroupName::parse)
                .transpose()
                .map_err(|e| corrupt("accounts.group_name", e))?,
            balance: row.balance,
        })
    }
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let seq = u64::try_from(row.seq).map_err(|e| corrupt("entries.seq", e))?;
        Ok(LedgerEntry {
            seq: EntrySeq::new(seq),
            kind: row.kind.parse::<EntryKind>().map_err(|e| corrupt("entries.kind", e))?,
            source: AccountId::parse(&row.source).map_err(|e| corrupt("entries.source", e))?,
            destination: AccountId::parse(&row.destination)
                .map_err(|e| corrupt("entries.destination", e))?,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<GrantRow> for GroupGrant {
    type Error = StoreError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        Ok(GroupGrant {
            issuer: AccountId::parse(&row.issuer).map_err(|e| corrupt("group_grants.issuer", e))?,
            group: GroupName::parse(&row.group_name).map_err(|e| corrupt("group_grants.group_name", e))?,
            subject: SubjectName::parse(&row.subject).map_err(|e| corrupt("group_grants.subject", e))?,
        })
    }
}
