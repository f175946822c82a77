/// Proportional reward allocation
///
/// ## Algorithm
/// 1. Drain the contribution ledger (the cycle belongs to this call only)
/// 2. Sum difficulty-weighted work per payout address
/// 3. `amount = floor(work × reward / total_work)` per address, in integers
/// 4. Credit every amount, then credit the pool fee to the treasury
///
/// Work enters integer arithmetic as `round(difficulty × WORK_SCALE)`,
/// saturating at `u128::MAX` per address; the total is summed in U256.
/// Products are taken in 256-bit space, so no reward/work magnitude can
/// overflow. Floor division leaves a residual of fewer sompi than there are
/// addresses; it is not redistributed.

use anyhow::Result;
use primitive_types::U256;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::metrics::ShareMetrics;
use crate::payout::{format_sompi, BalanceLedger};
use crate::shares::{Contribution, SharesManager};

/// Fixed-point scale for share difficulty.
pub const WORK_SCALE: f64 = 65_536.0;

/// Miner id the pool fee is credited under.
pub const POOL_MINER_ID: &str = "pool";

/// JSON numbers stop at 64 bits; work totals are rendered as strings.
fn u128_as_string<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Integer work units of one share.
pub fn work_units(difficulty: f64) -> u128 {
    if difficulty.is_finite() && difficulty > 0.0 {
        (difficulty * WORK_SCALE).round() as u128
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub address: String,
    /// Miner id of the address's last contribution in the cycle.
    pub miner_id: String,
    #[serde(serialize_with = "u128_as_string")]
    pub work: u128,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Allocation {
    /// Ordered by address.
    pub payouts: Vec<Payout>,
    #[serde(serialize_with = "u128_as_string")]
    pub total_work: u128,
    /// `miner_reward - Σ amount`.
    pub residual: u64,
}

/// Split `miner_reward` across `contributions` proportionally to work.
///
/// Addresses whose floor share is zero get no payout entry.
pub fn compute_allocation(contributions: &[Contribution], miner_reward: u64) -> Allocation {
    let mut works: BTreeMap<&str, (&str, u128)> = BTreeMap::new();
    for c in contributions {
        let entry = works.entry(c.address.as_str()).or_insert((c.miner_id.as_str(), 0));
        entry.0 = c.miner_id.as_str();
        entry.1 = entry.1.saturating_add(work_units(c.difficulty));
    }

    // summed in U256 so the shares of a saturated total never exceed the reward
    let total = works
        .values()
        .fold(U256::zero(), |acc, (_, w)| acc + U256::from(*w));
    if total.is_zero() {
        return Allocation {
            residual: miner_reward,
            ..Allocation::default()
        };
    }
    let total_work = if total.bits() > 128 { u128::MAX } else { total.low_u128() };

    let reward = U256::from(miner_reward);
    let payouts: Vec<Payout> = works
        .into_iter()
        .filter_map(|(address, (miner_id, work))| {
            // work <= total, so the quotient fits in u64
            let amount = (U256::from(work) * reward / total).low_u64();
            (amount > 0).then(|| Payout {
                address: address.to_string(),
                miner_id: miner_id.to_string(),
                work,
                amount,
            })
        })
        .collect();

    let paid: u64 = payouts.iter().map(|p| p.amount).sum();
    Allocation {
        payouts,
        total_work,
        residual: miner_reward - paid,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCredit {
    pub address: String,
    pub amount: u64,
    pub error: String,
}

/// Result of one settlement cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub id: Uuid,
    pub contributions: usize,
    #[serde(serialize_with = "u128_as_string")]
    pub total_work: u128,
    pub payouts: Vec<Payout>,
    pub residual: u64,
    /// Fee credited to the treasury; zero when nothing was paid out.
    pub fee: u64,
    pub failed: Vec<FailedCredit>,
}

impl Settlement {
    pub fn credited(&self) -> u64 {
        self.payouts
            .iter()
            .filter(|p| !self.failed.iter().any(|f| f.address == p.address))
            .map(|p| p.amount)
            .sum()
    }
}

pub struct RewardAllocator<B: BalanceLedger> {
    balances: Arc<B>,
    treasury_address: String,
    network: String,
    metrics: Arc<dyn ShareMetrics>,
    settling: Mutex<()>,
}

impl<B: BalanceLedger> RewardAllocator<B> {
    pub fn new(
        balances: Arc<B>,
        treasury_address: String,
        network: String,
        metrics: Arc<dyn ShareMetrics>,
    ) -> Self {
        Self {
            balances,
            treasury_address,
            network,
            metrics,
            settling: Mutex::new(()),
        }
    }

    pub fn balances(&self) -> &Arc<B> {
        &self.balances
    }

    /// Settle the current cycle. Cycles never overlap.
    pub async fn allocate(&self, shares: &SharesManager, miner_reward: u64, pool_fee: u64) -> Result<Settlement> {
        let _cycle = self.settling.lock().await;
        let contributions = shares.dump_contributions();
        self.settle(contributions, miner_reward, pool_fee).await
    }

    async fn settle(&self, contributions: Vec<Contribution>, miner_reward: u64, pool_fee: u64) -> Result<Settlement> {
        let id = Uuid::new_v4();

        let mut wallet_work: BTreeMap<&str, f64> = BTreeMap::new();
        for c in &contributions {
            self.metrics.miner_shares(&c.miner_id, c.difficulty);
            *wallet_work.entry(c.address.as_str()).or_insert(0.0) += c.difficulty;
        }
        for (address, work) in &wallet_work {
            self.metrics.wallet_work(address, *work);
        }

        let allocation = compute_allocation(&contributions, miner_reward);
        if allocation.total_work == 0 {
            tracing::info!("Settlement {}: no contributions this cycle, nothing to pay", id);
            return Ok(Settlement {
                id,
                contributions: contributions.len(),
                total_work: 0,
                payouts: Vec::new(),
                residual: allocation.residual,
                fee: 0,
                failed: Vec::new(),
            });
        }

        let mut failed = Vec::new();
        for payout in &allocation.payouts {
            match self.balances.credit(&payout.miner_id, &payout.address, payout.amount).await {
                Ok(()) => {
                    self.metrics.miner_reward(&payout.address, &payout.miner_id, payout.amount);
                    tracing::debug!(
                        "Allocated {} to {} ({}) for work {}",
                        format_sompi(payout.amount, &self.network),
                        payout.miner_id,
                        payout.address,
                        payout.work
                    );
                }
                Err(e) => {
                    tracing::warn!("⚠️  Failed to credit {} with {} sompi: {:#}", payout.address, payout.amount, e);
                    failed.push(FailedCredit {
                        address: payout.address.clone(),
                        amount: payout.amount,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        let fee = self.revenuize(pool_fee, &mut failed).await;

        tracing::info!(
            "💰 Settlement {}: {} contributions, {} payouts, {} allocated, residual {} sompi",
            id,
            contributions.len(),
            allocation.payouts.len(),
            format_sompi(miner_reward - allocation.residual, &self.network),
            allocation.residual
        );

        Ok(Settlement {
            id,
            contributions: contributions.len(),
            total_work: allocation.total_work,
            payouts: allocation.payouts,
            residual: allocation.residual,
            fee,
            failed,
        })
    }

    /// Credit the pool fee to the treasury under [`POOL_MINER_ID`].
    async fn revenuize(&self, pool_fee: u64, failed: &mut Vec<FailedCredit>) -> u64 {
        match self.balances.credit(POOL_MINER_ID, &self.treasury_address, pool_fee).await {
            Ok(()) => {
                tracing::info!(
                    "🏦 Treasury generated {} revenue over last coinbase",
                    format_sompi(pool_fee, &self.network)
                );
                pool_fee
            }
            Err(e) => {
                tracing::warn!("⚠️  Failed to credit pool fee to treasury: {:#}", e);
                failed.push(FailedCredit {
                    address: self.treasury_address.clone(),
                    amount: pool_fee,
                    error: format!("{:#}", e),
                });
                0
            }
        }
    }
}
