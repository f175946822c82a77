/// Pool service: wires share intake, the two control loops and settlement.
///
/// - VarDiff loop: every `vardiff.interval_secs`, adjusts worker difficulty
///   and broadcasts the changes
/// - Hashrate loop: every `hashrate.interval_secs`, publishes estimates and
///   evicts idle workers
/// - Coinbase worker: settles [`CoinbaseEvent`]s one at a time, in order

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::hashrate::{HashrateEstimator, HashrateReport};
use crate::metrics::ShareMetrics;
use crate::payout::BalanceLedger;
use crate::rewards::{RewardAllocator, Settlement};
use crate::shares::SharesManager;
use crate::vardiff::{VarDiffAdjustment, VarDiffConfig, VarDiffController};

const COINBASE_QUEUE: usize = 64;
const ADJUSTMENT_QUEUE: usize = 1024;

/// Reward signal from the treasury: a new coinbase has matured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseEvent {
    /// Sompi to split across this cycle's contributors.
    pub miner_reward: u64,
    /// Sompi credited to the treasury.
    pub pool_fee: u64,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub pool_address: String,
    pub network: String,
    pub vardiff: VarDiffConfig,
    pub vardiff_interval: Duration,
    pub hashrate_interval: Duration,
    pub retention_secs: u64,
}

impl PoolSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            pool_address: cfg.pool_address.clone(),
            network: cfg.network.clone(),
            vardiff: cfg.vardiff.clone(),
            vardiff_interval: Duration::from_secs(cfg.vardiff.interval_secs),
            hashrate_interval: Duration::from_secs(cfg.hashrate.interval_secs),
            retention_secs: cfg.registry.retention_secs,
        }
    }
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Loop task ended abnormally: {}", e);
        }
    }
}

/// Tick `f` every `every` until stopped. The first tick is one period out.
fn spawn_loop(name: &'static str, every: Duration, mut f: impl FnMut() + Send + 'static) -> LoopHandle {
    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = interval.tick() => f(),
                _ = stopped.changed() => break,
            }
        }
        tracing::info!("⏹️  {} loop stopped", name);
    });
    LoopHandle { stop, task }
}

pub struct Pool<B: BalanceLedger + 'static> {
    settings: PoolSettings,
    shares: Arc<SharesManager>,
    allocator: Arc<RewardAllocator<B>>,
    vardiff: Arc<VarDiffController>,
    hashrate: Arc<HashrateEstimator>,
    adjustments: broadcast::Sender<VarDiffAdjustment>,
    last_hashrate: Arc<RwLock<HashrateReport>>,
    last_settlement: Arc<RwLock<Option<Settlement>>>,
    coinbase_tx: mpsc::Sender<CoinbaseEvent>,
    coinbase_rx: Mutex<Option<mpsc::Receiver<CoinbaseEvent>>>,
    vardiff_loop: Mutex<Option<LoopHandle>>,
    hashrate_loop: Mutex<Option<LoopHandle>>,
    coinbase_worker: Mutex<Option<LoopHandle>>,
}

impl<B: BalanceLedger + 'static> Pool<B> {
    pub fn new(settings: PoolSettings, balances: Arc<B>, metrics: Arc<dyn ShareMetrics>) -> Self {
        let shares = Arc::new(SharesManager::new(metrics.clone()));
        let allocator = Arc::new(RewardAllocator::new(
            balances,
            settings.pool_address.clone(),
            settings.network.clone(),
            metrics.clone(),
        ));
        let vardiff = Arc::new(VarDiffController::new(settings.vardiff.clone(), metrics.clone()));
        let hashrate = Arc::new(HashrateEstimator::new(
            settings.pool_address.clone(),
            settings.retention_secs,
            metrics,
        ));
        let (adjustments, _) = broadcast::channel(ADJUSTMENT_QUEUE);
        let (coinbase_tx, coinbase_rx) = mpsc::channel(COINBASE_QUEUE);

        Self {
            settings,
            shares,
            allocator,
            vardiff,
            hashrate,
            adjustments,
            last_hashrate: Arc::new(RwLock::new(HashrateReport::default())),
            last_settlement: Arc::new(RwLock::new(None)),
            coinbase_tx,
            coinbase_rx: Mutex::new(Some(coinbase_rx)),
            vardiff_loop: Mutex::new(None),
            hashrate_loop: Mutex::new(None),
            coinbase_worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn shares(&self) -> &Arc<SharesManager> {
        &self.shares
    }

    pub fn allocator(&self) -> &Arc<RewardAllocator<B>> {
        &self.allocator
    }

    /// Difficulty changes made by the VarDiff loop.
    pub fn subscribe_adjustments(&self) -> broadcast::Receiver<VarDiffAdjustment> {
        self.adjustments.subscribe()
    }

    pub fn last_hashrate(&self) -> HashrateReport {
        self.last_hashrate.read().clone()
    }

    pub fn last_settlement(&self) -> Option<Settlement> {
        self.last_settlement.read().clone()
    }

    /// Start both control loops and the coinbase worker.
    pub fn start(&self) {
        self.start_vardiff();
        self.start_hashrate();
        self.start_coinbase_worker();
        tracing::info!(
            "🚀 Pool started (vardiff every {:?}, hashrate every {:?}, target {} shares/min)",
            self.settings.vardiff_interval,
            self.settings.hashrate_interval,
            self.settings.vardiff.shares_per_minute
        );
    }

    pub fn start_vardiff(&self) {
        let mut slot = self.vardiff_loop.lock();
        if slot.is_some() {
            tracing::warn!("VarDiff loop already running");
            return;
        }
        let shares = self.shares.clone();
        let vardiff = self.vardiff.clone();
        let adjustments = self.adjustments.clone();
        *slot = Some(spawn_loop("VarDiff", self.settings.vardiff_interval, move || {
            let now = chrono::Utc::now().timestamp_millis();
            for adjustment in vardiff.adjust_at(shares.registry(), now) {
                // no subscribers is fine
                let _ = adjustments.send(adjustment);
            }
        }));
    }

    pub async fn stop_vardiff(&self) {
        let handle = self.vardiff_loop.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub fn start_hashrate(&self) {
        let mut slot = self.hashrate_loop.lock();
        if slot.is_some() {
            tracing::warn!("Hashrate loop already running");
            return;
        }
        let shares = self.shares.clone();
        let hashrate = self.hashrate.clone();
        let last = self.last_hashrate.clone();
        *slot = Some(spawn_loop("Hashrate", self.settings.hashrate_interval, move || {
            let now = chrono::Utc::now().timestamp_millis();
            let report = hashrate.estimate_at(shares.registry(), now);
            *last.write() = report;
        }));
    }

    pub async fn stop_hashrate(&self) {
        let handle = self.hashrate_loop.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    fn start_coinbase_worker(&self) {
        let Some(mut rx) = self.coinbase_rx.lock().take() else {
            return;
        };
        let shares = self.shares.clone();
        let allocator = self.allocator.clone();
        let last = self.last_settlement.clone();
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = stopped.changed() => None,
                };
                match event {
                    Some(event) => settle(&allocator, &shares, event, &last).await,
                    None => break,
                }
            }
            // settle what was queued before shutdown
            rx.close();
            while let Some(event) = rx.recv().await {
                settle(&allocator, &shares, event, &last).await;
            }
            tracing::info!("⏹️  Coinbase worker stopped");
        });

        *self.coinbase_worker.lock() = Some(LoopHandle { stop, task });
    }

    /// Queue a reward signal for settlement.
    pub async fn submit_coinbase(&self, event: CoinbaseEvent) -> Result<()> {
        self.coinbase_tx
            .send(event)
            .await
            .map_err(|_| anyhow!("coinbase worker is not running"))
    }

    pub fn coinbase_sender(&self) -> mpsc::Sender<CoinbaseEvent> {
        self.coinbase_tx.clone()
    }

    /// Stop the loops, then settle every queued coinbase event.
    pub async fn shutdown(&self) {
        self.stop_vardiff().await;
        self.stop_hashrate().await;
        let worker = self.coinbase_worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
        tracing::info!("👋 Pool shut down");
    }
}

async fn settle<B: BalanceLedger>(
    allocator: &RewardAllocator<B>,
    shares: &SharesManager,
    event: CoinbaseEvent,
    last: &RwLock<Option<Settlement>>,
) {
    match allocator.allocate(shares, event.miner_reward, event.pool_fee).await {
        Ok(settlement) => {
            if !settlement.failed.is_empty() {
                tracing::warn!(
                    "Settlement {} finished with {} failed credits",
                    settlement.id,
                    settlement.failed.len()
                );
            }
            *last.write() = Some(settlement);
        }
        Err(e) => tracing::error!("Settlement failed: {:#}", e),
    }
}
