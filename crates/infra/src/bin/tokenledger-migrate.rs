//! Create or upgrade the ledger schema in the configured database.

use anyhow::Context;

use tokenledger_infra::{LedgerConfig, SqliteLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tokenledger_observability::init();

    let config = LedgerConfig::from_env();
    tracing::info!(database_url = %config.database_url, "migrating ledger schema");

    let store = SqliteLedgerStore::connect(&config)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    store.migrate().await.context("schema migration failed")?;

    tracing::info!("ledger schema is up to date");
    Ok(())
}
