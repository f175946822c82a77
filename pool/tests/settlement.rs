/// Settlement integration tests
///
/// Validates:
/// 1. Proportional split through the full intake -> allocate path
/// 2. Conservation: Σ payouts ≤ reward, residual < #addresses
/// 3. Fee credit to the treasury, skipped on empty cycles
/// 4. Failed credits do not abort the cycle
/// 5. Drain exactly-once under concurrent intake
/// 6. Coinbase events queued on the service settle in order

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kaspool::blockchain::{PowCheck, TemplateSource, TemplateState};
use kaspool::metrics::PrometheusMetrics;
use kaspool::payout::{BalanceLedger, MemoryBalances};
use kaspool::rewards::{compute_allocation, RewardAllocator, POOL_MINER_ID};
use kaspool::service::{CoinbaseEvent, Pool, PoolSettings};
use kaspool::shares::{Contribution, SharesManager};
use kaspool::vardiff::VarDiffConfig;
use primitive_types::U256;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct AlwaysValid;

impl TemplateState for AlwaysValid {
    fn check_work(&self, _nonce: u64) -> PowCheck {
        PowCheck {
            is_block: false,
            proof: U256::zero(),
        }
    }
}

struct OneLiveTemplate;

impl TemplateSource for OneLiveTemplate {
    type State = AlwaysValid;

    fn resolve(&self, _hash: &str) -> Option<Arc<AlwaysValid>> {
        Some(Arc::new(AlwaysValid))
    }

    async fn submit(&self, _miner_id: &str, _hash: &str, _nonce: u64) -> Result<bool> {
        Ok(false)
    }
}

/// Rejects credits for one address, forwards the rest.
struct FailingBalances {
    inner: MemoryBalances,
    broken: String,
}

impl BalanceLedger for FailingBalances {
    async fn credit(&self, miner_id: &str, address: &str, amount: u64) -> Result<()> {
        if address == self.broken {
            bail!("database unavailable");
        }
        self.inner.credit(miner_id, address, amount).await
    }
}

const TREASURY: &str = "kaspa:treasury";

fn allocator<B: BalanceLedger>(balances: Arc<B>) -> RewardAllocator<B> {
    allocator_with(balances, Arc::new(PrometheusMetrics::new().unwrap()))
}

fn allocator_with<B: BalanceLedger>(balances: Arc<B>, metrics: Arc<PrometheusMetrics>) -> RewardAllocator<B> {
    RewardAllocator::new(balances, TREASURY.to_string(), "mainnet".to_string(), metrics)
}

fn contribution(address: &str, difficulty: f64) -> Contribution {
    Contribution {
        address: address.to_string(),
        miner_id: format!("{}-rig", address),
        difficulty,
        timestamp: 0,
    }
}

/// Deterministic pseudo-random sequence (64-bit LCG).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 11
    }
}

// =========================================================================
// 1. Proportional split
// =========================================================================

#[tokio::test]
async fn test_reward_example_through_intake() {
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let shares = SharesManager::new(metrics.clone());
    let src = OneLiveTemplate;
    // A works at 100, B at 200 (first share bootstraps each worker's difficulty)
    shares.add_share("a1", "A", "t", 100.0, 1, &src).await.unwrap();
    shares.add_share("b1", "B", "t", 200.0, 2, &src).await.unwrap();

    let balances = Arc::new(MemoryBalances::new());
    let alloc = allocator_with(balances.clone(), metrics.clone());
    let settlement = alloc.allocate(&shares, 1_000_000, 5_000).await.unwrap();

    assert_eq!(balances.balance("A"), 333_333);
    assert_eq!(balances.balance("B"), 666_666);
    assert_eq!(settlement.residual, 1);
    assert_eq!(settlement.contributions, 2);
    assert_eq!(settlement.fee, 5_000);
    assert_eq!(balances.balance(TREASURY), 5_000);
    assert_eq!(balances.entry(TREASURY).unwrap().miner_id, POOL_MINER_ID);
    assert!(shares.ledger().is_empty());

    assert_eq!(metrics.reward_of("A", "a1"), 333_333);
    assert_eq!(metrics.reward_of("B", "b1"), 666_666);
    assert_eq!(metrics.wallet_work_of("B"), 200.0);
}

#[test]
fn test_proportionality_converges() {
    for scale in [1.0, 10.0, 1_000.0, 100_000.0] {
        let c = vec![contribution("A", 3.0 * scale), contribution("B", 7.0 * scale)];
        let alloc = compute_allocation(&c, 1_000_000_007);
        let ratio = alloc.payouts[0].amount as f64 / alloc.payouts[1].amount as f64;
        assert!((ratio - 3.0 / 7.0).abs() < 1e-8, "scale {scale}: ratio {ratio}");
    }
}

// =========================================================================
// 2. Conservation
// =========================================================================

#[test]
fn test_conservation_over_random_cycles() {
    let mut rng = Lcg(0x5eed);
    for _ in 0..200 {
        let addresses = 1 + (rng.next() % 40) as usize;
        let contributions: Vec<Contribution> = (0..1 + rng.next() % 300)
            .map(|_| {
                let addr = format!("kaspa:{}", rng.next() as usize % addresses);
                let difficulty = 1.0 + (rng.next() % 1_000_000) as f64 / 7.0;
                contribution(&addr, difficulty)
            })
            .collect();
        let distinct: HashSet<&str> = contributions.iter().map(|c| c.address.as_str()).collect();
        let reward = rng.next();

        let alloc = compute_allocation(&contributions, reward);
        let paid: u128 = alloc.payouts.iter().map(|p| u128::from(p.amount)).sum();

        assert!(paid <= u128::from(reward));
        assert_eq!(u128::from(reward) - paid, u128::from(alloc.residual));
        assert!((alloc.residual as usize) < distinct.len());
    }
}

// =========================================================================
// 3. Empty cycle
// =========================================================================

#[tokio::test]
async fn test_empty_cycle_pays_nothing_not_even_fee() {
    let shares = SharesManager::new(Arc::new(PrometheusMetrics::new().unwrap()));
    let balances = Arc::new(MemoryBalances::new());
    let alloc = allocator(balances.clone());

    let settlement = alloc.allocate(&shares, 1_000_000, 5_000).await.unwrap();
    assert!(settlement.payouts.is_empty());
    assert_eq!(settlement.fee, 0);
    assert_eq!(balances.total(), 0);
}

// =========================================================================
// 4. Failed credits
// =========================================================================

#[tokio::test]
async fn test_failed_credit_is_reported_and_others_paid() {
    let shares = SharesManager::new(Arc::new(PrometheusMetrics::new().unwrap()));
    let src = OneLiveTemplate;
    shares.add_share("a1", "A", "t", 1.0, 1, &src).await.unwrap();
    shares.add_share("b1", "B", "t", 1.0, 2, &src).await.unwrap();
    shares.add_share("c1", "C", "t", 2.0, 3, &src).await.unwrap();

    let balances = Arc::new(FailingBalances {
        inner: MemoryBalances::new(),
        broken: "B".to_string(),
    });
    let alloc = allocator(balances.clone());
    let settlement = alloc.allocate(&shares, 400, 10).await.unwrap();

    assert_eq!(settlement.failed.len(), 1);
    assert_eq!(settlement.failed[0].address, "B");
    assert_eq!(settlement.failed[0].amount, 100);
    assert_eq!(balances.inner.balance("A"), 100);
    assert_eq!(balances.inner.balance("C"), 200);
    assert_eq!(balances.inner.balance(TREASURY), 10);
    assert_eq!(settlement.credited(), 300);
}

// =========================================================================
// 5. Drain exactly-once
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_intake_and_settlement_lose_nothing() {
    let shares = Arc::new(SharesManager::new(Arc::new(PrometheusMetrics::new().unwrap())));
    let balances = Arc::new(MemoryBalances::new());
    let alloc = Arc::new(allocator(balances.clone()));
    let src = Arc::new(OneLiveTemplate);

    let mut producers = Vec::new();
    for m in 0..4u64 {
        let shares = shares.clone();
        let src = src.clone();
        producers.push(tokio::spawn(async move {
            let address = format!("kaspa:{}", m);
            for n in 0..500u64 {
                shares
                    .add_share("rig", &address, "t", 1.0, m * 10_000 + n, src.as_ref())
                    .await
                    .unwrap();
                if n % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }

    let settler = {
        let shares = shares.clone();
        let alloc = alloc.clone();
        tokio::spawn(async move {
            let mut settled = 0usize;
            for _ in 0..20 {
                settled += alloc.allocate(&shares, 1_000_000, 0).await.unwrap().contributions;
                tokio::task::yield_now().await;
            }
            settled
        })
    };

    for p in producers {
        p.await.unwrap();
    }
    let mut settled = settler.await.unwrap();
    settled += alloc.allocate(&shares, 1_000_000, 0).await.unwrap().contributions;

    assert_eq!(settled, 2_000);
    assert!(shares.ledger().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_coinbases_settle_disjoint_cycles() {
    let shares = Arc::new(SharesManager::new(Arc::new(PrometheusMetrics::new().unwrap())));
    let src = OneLiveTemplate;
    for n in 0..100u64 {
        shares.add_share("rig", "kaspa:a", "t", 1.0, n, &src).await.unwrap();
    }

    let balances = Arc::new(MemoryBalances::new());
    let alloc = Arc::new(allocator(balances.clone()));
    let (a, b) = tokio::join!(
        alloc.allocate(&shares, 1_000, 0),
        alloc.allocate(&shares, 1_000, 0)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.contributions + b.contributions, 100);
    assert!(a.contributions == 0 || b.contributions == 0);
    assert_eq!(balances.balance("kaspa:a"), 1_000);
}

// =========================================================================
// 6. Coinbase queue
// =========================================================================

#[tokio::test]
async fn test_queued_coinbases_settle_in_order() {
    let settings = PoolSettings {
        pool_address: TREASURY.into(),
        network: "mainnet".into(),
        vardiff: VarDiffConfig::default(),
        vardiff_interval: Duration::from_secs(300),
        hashrate_interval: Duration::from_secs(60),
        retention_secs: 86_400,
    };
    let balances = Arc::new(MemoryBalances::new());
    let pool = Pool::new(settings, balances.clone(), Arc::new(PrometheusMetrics::new().unwrap()));
    let src = OneLiveTemplate;
    pool.shares().add_share("a1", "A", "t", 1.0, 1, &src).await.unwrap();
    pool.shares().add_share("b1", "B", "t", 3.0, 2, &src).await.unwrap();

    // queued before the worker starts; drained once it does
    pool.submit_coinbase(CoinbaseEvent { miner_reward: 4_000, pool_fee: 100 }).await.unwrap();
    pool.submit_coinbase(CoinbaseEvent { miner_reward: 9_000, pool_fee: 100 }).await.unwrap();
    pool.start();
    pool.shutdown().await;

    // the first event took the whole cycle; the second found it empty
    assert_eq!(balances.balance("A"), 1_000);
    assert_eq!(balances.balance("B"), 3_000);
    assert_eq!(balances.balance(TREASURY), 100);
    let last = pool.last_settlement().unwrap();
    assert_eq!(last.contributions, 0);
    assert_eq!(last.fee, 0);
}
