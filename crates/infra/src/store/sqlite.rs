//! SQLite-backed ledger store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | SQLite code | StoreError | Scenario |
//! |------------|-------------|------------|----------|
//! | Database (busy / locked) | `5`, `6`, `517` | `Busy` | Another writer holds the database lock |
//! | Database (unique / primary key) | `2067`, `1555` | caller-specific (`AccountExists`, `DuplicateGrant`) | Duplicate identity or grant |
//! | Database (other) | any other | `Backend` | Constraint or engine failure |
//! | Decode / ColumnDecode | N/A | `Corrupt` | Row could not be decoded |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Backend` | Connection loss |
//!
//! ## Atomic units
//!
//! A unit is one SQLite transaction. Its first statement is the conditional
//! balance `UPDATE`, so the transaction takes the database write lock before
//! reading anything; SQLite then serializes writers and the conditional
//! update is the authoritative non-negativity check. The unit's lock set is
//! therefore only checked, not used for locking. Appended entries are held
//! until `commit`, which inserts them with the commit timestamp.
//!
//! ## Snapshots
//!
//! A snapshot is a read transaction; in WAL mode it sees the database as of
//! its first read for its whole lifetime.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use tokenledger_auth::GroupGrant;
use tokenledger_core::{AccountId, EntrySeq, GroupName};
use tokenledger_ledger::{Account, LedgerEntry, NewAccount, NewEntry};

use super::schema::{AccountRow, EntryRow, GrantRow, MIGRATIONS};
use super::{BalanceChange, EntryIndex, LedgerSnapshot, LedgerStore, Pagination, UnitOfWork};
use crate::config::LedgerConfig;
use crate::error::StoreError;

const ACCOUNT_COLUMNS: &str = "identity, display_name, role, group_name, balance";
const ENTRY_COLUMNS: &str = "seq, kind, source, destination, amount, created_at";

/// SQLite-backed ledger store.
///
/// `Send + Sync`; all operations go through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database named by `config`.
    #[instrument(skip(config), fields(database_url = %config.database_url), err)]
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| map_sqlx_error("parse_database_url", e))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables, indexes and immutability triggers if absent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_migration", e))?;
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_migration", e))?;
        tracing::debug!(statements = MIGRATIONS.len(), "schema migrated");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    #[instrument(skip(self, account), fields(account = %account.id), err)]
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (identity, display_name, role, group_name, balance, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(account.id.as_str())
        .bind(&account.display_name)
        .bind(account.role.as_str())
        .bind(account.group.as_ref().map(|g| g.as_str()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account.into_account()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AccountExists(account.id)),
            Err(e) => Err(map_sqlx_error("create_account", e)),
        }
    }

    async fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE identity = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("account", e))?;

        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn insert_grant(&self, grant: GroupGrant) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO group_grants (issuer, group_name, subject) VALUES (?, ?, ?)")
            .bind(grant.issuer.as_str())
            .bind(grant.group.as_str())
            .bind(grant.subject.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateGrant(grant)),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::UnknownAccount(grant.issuer)),
            Err(e) => Err(map_sqlx_error("insert_grant", e)),
        }
    }

    async fn grants_for(&self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            "SELECT issuer, group_name, subject FROM group_grants WHERE issuer = ? ORDER BY group_name, subject",
        )
        .bind(issuer.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grants_for", e))?;

        rows.into_iter().map(GroupGrant::try_from).collect()
    }

    async fn begin(&self, lock_set: &[AccountId]) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_unit", e))?;
        Ok(Box::new(SqliteUnit {
            tx,
            lock_set: lock_set.to_vec(),
            staged: Vec::new(),
        }))
    }

    async fn snapshot(&self) -> Result<Box<dyn LedgerSnapshot>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_snapshot", e))?;
        Ok(Box::new(SqliteSnapshot { tx }))
    }
}

struct SqliteUnit {
    tx: Transaction<'static, Sqlite>,
    lock_set: Vec<AccountId>,
    staged: Vec<NewEntry>,
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn adjust_balance(&mut self, account: &AccountId, delta: i64) -> Result<BalanceChange, StoreError> {
        if !self.lock_set.contains(account) {
            return Err(StoreError::NotLocked(account.clone()));
        }

        // Conditional update: the row only changes when the result stays in
        // [0, i64::MAX]. SQLite would widen an overflowing sum to REAL.
        let ceiling = if delta > 0 { i64::MAX - delta } else { i64::MAX };
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + ? \
             WHERE identity = ? AND balance + ? >= 0 AND balance <= ? \
             RETURNING balance",
        )
        .bind(delta)
        .bind(account.as_str())
        .bind(delta)
        .bind(ceiling)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_balance", e))?;

        if let Some(balance) = updated {
            return Ok(BalanceChange::Applied { balance });
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT balance FROM accounts WHERE identity = ?")
            .bind(account.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("read_balance", e))?;

        match current {
            Some(balance) if balance.checked_add(delta).is_none() => Ok(BalanceChange::Overflow { balance }),
            Some(balance) => Ok(BalanceChange::Insufficient { balance }),
            None => Err(StoreError::UnknownAccount(account.clone())),
        }
    }

    async fn append(&mut self, entry: NewEntry) -> Result<(), StoreError> {
        self.staged.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<Vec<LedgerEntry>, StoreError> {
        let SqliteUnit { mut tx, staged, .. } = *self;
        let committed_at = Utc::now();
        let mut committed = Vec::with_capacity(staged.len());

        for entry in staged {
            let seq: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO entries (kind, source, destination, amount, created_at)
                VALUES (?, ?, ?, ?, ?)
                RETURNING seq
                "#,
            )
            .bind(entry.kind.as_str())
            .bind(entry.source.as_str())
            .bind(entry.destination.as_str())
            .bind(entry.amount)
            .bind(committed_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("append_entry", e))?;

            let seq = u64::try_from(seq).map_err(|e| StoreError::Corrupt(format!("entries.seq: {e}")))?;
            committed.push(LedgerEntry::commit(entry, EntrySeq::new(seq), committed_at));
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_unit", e))?;
        Ok(committed)
    }
}

struct SqliteSnapshot {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl LedgerSnapshot for SqliteSnapshot {
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE identity = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_account", e))?;

        row.map(Account::try_from).transpose()
    }

    async fn holders_in_group(&mut self, group: &GroupName) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE role = 'holder' AND group_name = ? \
             ORDER BY balance DESC, identity ASC"
        ))
        .bind(group.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("holders_in_group", e))?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn grants_for(&mut self, issuer: &AccountId) -> Result<Vec<GroupGrant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            "SELECT issuer, group_name, subject FROM group_grants WHERE issuer = ? ORDER BY group_name, subject",
        )
        .bind(issuer.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_grants_for", e))?;

        rows.into_iter().map(GroupGrant::try_from).collect()
    }

    async fn entries(
        &mut self,
        index: EntryIndex,
        account: &AccountId,
        page: Pagination,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let column = match index {
            EntryIndex::BySource => "source",
            EntryIndex::ByCounterparty => "destination",
        };
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE {column} = ? ORDER BY seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(account.as_str())
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("entries", e))?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn entry_count(&mut self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("entry_count", e))?;
        Ok(count as u64)
    }
}

fn sqlite_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(sqlite_code(err).as_deref(), Some("2067") | Some("1555"))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(sqlite_code(err).as_deref(), Some("787"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("5") | Some("6") | Some("517") => StoreError::Busy(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::Decode(e) => StoreError::Corrupt(format!("decode error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Corrupt(format!("column {index} in {operation}: {source}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Busy(format!("connection pool timed out in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
