//! Ledger behaviour on the durable SQLite store.

use std::sync::Arc;

use tempfile::TempDir;

use tokenledger_auth::Principal;
use tokenledger_core::{AccountId, GroupName, LedgerError, SubjectName};
use tokenledger_infra::{
    BalanceChange, EngineError, LedgerConfig, LedgerSnapshot, LedgerStore, QueryService, SqliteLedgerStore,
    TransferEngine, UnitOfWork,
};
use tokenledger_ledger::{EntryKind, NewAccount, NewEntry};

fn id(s: &str) -> AccountId {
    AccountId::parse(s).unwrap()
}

fn group(s: &str) -> GroupName {
    GroupName::parse(s).unwrap()
}

fn prof() -> Principal {
    Principal::issuer(id("profx"))
}

async fn open_store(dir: &TempDir) -> SqliteLedgerStore {
    let config = LedgerConfig {
        database_url: format!("sqlite://{}", dir.path().join("ledger.db").display()),
        ..LedgerConfig::default()
    };
    let store = SqliteLedgerStore::connect(&config).await.unwrap();
    store.migrate().await.unwrap();
    store
}

async fn seeded(dir: &TempDir, holders: &[&str]) -> Arc<SqliteLedgerStore> {
    let store = Arc::new(open_store(dir).await);
    let engine = TransferEngine::new(store.clone());
    engine
        .open_account(NewAccount::issuer(id("profx"), "Prof X"))
        .await
        .unwrap();
    for name in holders {
        engine
            .open_account(NewAccount::holder(id(name), name.to_uppercase(), group("3A")))
            .await
            .unwrap();
    }
    engine
        .register_group(&prof(), group("3A"), SubjectName::parse("history").unwrap())
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn migration_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();
}

#[tokio::test]
async fn scenario_on_durable_store() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a", "b"]).await;
    let engine = TransferEngine::new(store.clone());
    let queries = QueryService::new(store.clone());

    engine.issue(&prof(), &id("a"), 100).await.unwrap();
    let receipt = engine.transfer(&Principal::holder(id("a")), &id("b"), 30).await.unwrap();
    assert_eq!((receipt.sender_balance, receipt.receiver_balance), (70, 30));

    let err = engine
        .transfer(&Principal::holder(id("a")), &id("b"), 80)
        .await
        .unwrap_err();
    assert!(matches!(err.as_domain(), Some(LedgerError::InsufficientFunds { .. })));

    assert_eq!(engine.issue(&prof(), &id("a"), 50).await.unwrap().new_balance, 120);
    let err = engine.issue(&prof(), &id("a"), -200).await.unwrap_err();
    assert!(matches!(err.as_domain(), Some(LedgerError::InsufficientFunds { .. })));

    let statement = queries.statement(&Principal::holder(id("a")), &id("a")).await.unwrap();
    assert_eq!(statement.balance, 120);
    let kinds: Vec<(EntryKind, i64)> = statement.lines.iter().map(|l| (l.kind, l.amount)).collect();
    assert_eq!(
        kinds,
        vec![(EntryKind::Issuance, 50), (EntryKind::Transfer, -30), (EntryKind::Issuance, 100)]
    );
    assert_eq!(queries.entry_count().await.unwrap(), 3);
}

#[tokio::test]
async fn state_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    {
        let store = seeded(&dir, &["a"]).await;
        TransferEngine::new(store.clone())
            .issue(&prof(), &id("a"), 42)
            .await
            .unwrap();
        store.pool().close().await;
    }

    let store = open_store(&dir).await;
    assert_eq!(store.account(&id("a")).await.unwrap().unwrap().balance, 42);
    assert_eq!(store.grants_for(&id("profx")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicates_are_rejected_by_constraints() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a"]).await;
    let engine = TransferEngine::new(store);

    let err = engine
        .register_group(&prof(), group("3A"), SubjectName::parse("history").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err.as_domain(), Some(LedgerError::DuplicateGrant { .. })));

    let err = engine
        .open_account(NewAccount::holder(id("a"), "A", group("3A")))
        .await
        .unwrap_err();
    assert_eq!(err.as_domain(), Some(&LedgerError::AccountExists(id("a"))));
}

#[tokio::test]
async fn entries_cannot_be_updated_or_deleted() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a"]).await;
    TransferEngine::new(store.clone())
        .issue(&prof(), &id("a"), 5)
        .await
        .unwrap();

    assert!(sqlx::query("UPDATE entries SET amount = 500").execute(store.pool()).await.is_err());
    assert!(sqlx::query("DELETE FROM entries").execute(store.pool()).await.is_err());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn leaderboard_orders_by_balance_then_identity() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["amy", "ben", "cal"]).await;
    let engine = TransferEngine::new(store.clone());
    engine.issue(&prof(), &id("cal"), 20).await.unwrap();
    engine.issue(&prof(), &id("ben"), 10).await.unwrap();
    engine.issue(&prof(), &id("amy"), 10).await.unwrap();

    let rows = QueryService::new(store)
        .leaderboard(&prof(), &group("3A"))
        .await
        .unwrap();
    let order: Vec<&str> = rows.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(order, vec!["cal", "amy", "ben"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_serialize_on_sqlite() {
    const RECEIVERS: usize = 12;
    const BALANCE: i64 = 50;
    const AMOUNT: i64 = 9;

    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..RECEIVERS).map(|i| format!("r{i:02}")).collect();
    let mut holders: Vec<&str> = names.iter().map(String::as_str).collect();
    holders.push("x");
    let store = seeded(&dir, &holders).await;
    let engine = Arc::new(TransferEngine::new(store.clone()));
    engine.issue(&prof(), &id("x"), BALANCE).await.unwrap();

    let mut tasks = Vec::new();
    for name in names {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.transfer(&Principal::holder(id("x")), &id(&name), AMOUNT).await
        }));
    }

    let mut succeeded = 0i64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::Domain(LedgerError::InsufficientFunds { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, BALANCE / AMOUNT);
    assert_eq!(store.account(&id("x")).await.unwrap().unwrap().balance, BALANCE % AMOUNT);

    let reconciliation = QueryService::new(store)
        .reconcile(&prof(), &id("x"))
        .await
        .unwrap();
    assert!(reconciliation.is_consistent());
}

#[tokio::test]
async fn extreme_amounts_are_rejected_without_entries() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a", "b"]).await;
    let engine = TransferEngine::new(store.clone());
    engine.issue(&prof(), &id("a"), 10).await.unwrap();
    engine.issue(&prof(), &id("b"), i64::MAX).await.unwrap();

    for err in [
        engine.issue(&prof(), &id("a"), i64::MIN).await.unwrap_err(),
        engine.issue(&prof(), &id("a"), i64::MAX).await.unwrap_err(),
        engine.transfer(&Principal::holder(id("a")), &id("b"), 1).await.unwrap_err(),
    ] {
        assert!(matches!(err.as_domain(), Some(LedgerError::InvalidAmount(_))), "{err}");
    }

    assert_eq!(store.account(&id("a")).await.unwrap().unwrap().balance, 10);
    assert_eq!(store.account(&id("b")).await.unwrap().unwrap().balance, i64::MAX);
    assert_eq!(QueryService::new(store).entry_count().await.unwrap(), 2);
}

#[tokio::test]
async fn unit_reports_overflow_instead_of_widening() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a"]).await;

    let mut unit = store.begin(&[id("a")]).await.unwrap();
    assert_eq!(
        unit.adjust_balance(&id("a"), i64::MAX - 1).await.unwrap(),
        BalanceChange::Applied { balance: i64::MAX - 1 }
    );
    assert_eq!(
        unit.adjust_balance(&id("a"), 2).await.unwrap(),
        BalanceChange::Overflow { balance: i64::MAX - 1 }
    );
    assert_eq!(
        unit.adjust_balance(&id("a"), i64::MIN).await.unwrap(),
        BalanceChange::Insufficient { balance: i64::MAX - 1 }
    );
    assert_eq!(
        unit.adjust_balance(&id("a"), 1).await.unwrap(),
        BalanceChange::Applied { balance: i64::MAX }
    );
}

#[tokio::test]
async fn entries_are_stamped_at_commit() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir, &["a"]).await;

    let mut unit = store.begin(&[id("a")]).await.unwrap();
    unit.adjust_balance(&id("a"), 3).await.unwrap();
    unit.append(NewEntry {
        kind: EntryKind::Issuance,
        source: id("profx"),
        destination: id("a"),
        amount: 3,
    })
    .await
    .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let before_commit = chrono::Utc::now();
    let committed = unit.commit().await.unwrap();
    assert!(committed[0].created_at >= before_commit);

    let mut snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.entry_count().await.unwrap(), 1);
}
