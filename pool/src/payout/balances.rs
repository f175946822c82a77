use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio_postgres::{Client, NoTls};

/// Destination of settlement credits.
pub trait BalanceLedger: Send + Sync {
    /// Add `amount` sompi to `address`, recording `miner_id` as its last miner.
    fn credit(&self, miner_id: &str, address: &str, amount: u64) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub miner_id: String,
    pub balance: u64,
}

/// In-process balances, used when no database is configured.
#[derive(Default)]
pub struct MemoryBalances {
    entries: Mutex<HashMap<String, BalanceEntry>>,
}

impl MemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.entries.lock().get(address).map(|e| e.balance).unwrap_or(0)
    }

    pub fn entry(&self, address: &str) -> Option<BalanceEntry> {
        self.entries.lock().get(address).cloned()
    }

    /// Sum of all balances.
    pub fn total(&self) -> u128 {
        self.entries.lock().values().map(|e| u128::from(e.balance)).sum()
    }
}

impl BalanceLedger for MemoryBalances {
    async fn credit(&self, miner_id: &str, address: &str, amount: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(address.to_string()).or_insert_with(|| BalanceEntry {
            miner_id: miner_id.to_string(),
            balance: 0,
        });
        entry.balance = entry
            .balance
            .checked_add(amount)
            .with_context(|| format!("balance overflow for {}", address))?;
        entry.miner_id = miner_id.to_string();
        Ok(())
    }
}

/// `miners` table in PostgreSQL, one row per wallet.
pub struct PostgresBalances {
    client: Client,
}

impl PostgresBalances {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(db_url, NoTls)
            .await
            .context("connecting to PostgreSQL")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        let balances = Self { client };
        balances.init_schema().await?;
        Ok(balances)
    }

    pub async fn init_schema(&self) -> Result<()> {
        self.client
            .batch_execute(
                r#"
            CREATE TABLE IF NOT EXISTS miners (
                id TEXT NOT NULL,
                wallet TEXT PRIMARY KEY,
                balance BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
        "#,
            )
            .await
            .context("creating miners table")?;
        tracing::info!("✅ Balance schema ready");
        Ok(())
    }

    pub async fn balance(&self, address: &str) -> Result<u64> {
        let row = self
            .client
            .query_opt("SELECT balance FROM miners WHERE wallet = $1", &[&address])
            .await?;
        let balance: i64 = row.map(|r| r.get(0)).unwrap_or(0);
        Ok(u64::try_from(balance)?)
    }
}

impl BalanceLedger for PostgresBalances {
    async fn credit(&self, miner_id: &str, address: &str, amount: u64) -> Result<()> {
        let amount = i64::try_from(amount).context("credit exceeds BIGINT")?;
        self.client
            .execute(
                r#"
            INSERT INTO miners (id, wallet, balance, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (wallet) DO UPDATE
            SET balance = miners.balance + EXCLUDED.balance,
                id = EXCLUDED.id,
                updated_at = EXCLUDED.updated_at
            "#,
                &[&miner_id, &address, &amount, &Utc::now()],
            )
            .await
            .with_context(|| format!("crediting {} sompi to {}", amount, address))?;
        Ok(())
    }
}

/// Backend chosen at startup.
pub enum AnyBalances {
    Memory(MemoryBalances),
    Postgres(PostgresBalances),
}

impl AnyBalances {
    pub async fn from_url(db_url: Option<&str>) -> Result<Self> {
        match db_url {
            Some(url) => {
                let pg = PostgresBalances::connect(url).await?;
                tracing::info!("💾 Balances stored in PostgreSQL");
                Ok(Self::Postgres(pg))
            }
            None => {
                tracing::warn!("⚠️  No DATABASE_URL set; balances are kept in memory only");
                Ok(Self::Memory(MemoryBalances::new()))
            }
        }
    }
}

impl BalanceLedger for AnyBalances {
    async fn credit(&self, miner_id: &str, address: &str, amount: u64) -> Result<()> {
        match self {
            Self::Memory(m) => m.credit(miner_id, address, amount).await,
            Self::Postgres(p) => p.credit(miner_id, address, amount).await,
        }
    }
}
