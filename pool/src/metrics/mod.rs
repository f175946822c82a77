/// Observability sink for the share engine.
///
/// The engine never touches a metrics backend directly; every event goes
/// through an injected [`ShareMetrics`] so the core runs without Prometheus
/// in tests and embedders.

pub mod prometheus;
pub mod push;

pub use self::prometheus::{PrometheusMetrics, ShareEvent};
pub use push::Pushgateway;

/// Events emitted by share intake, the control loops and settlement.
pub trait ShareMetrics: Send + Sync {
    fn share_added(&self, miner_id: &str, address: &str);
    fn share_duplicate(&self, miner_id: &str, address: &str);
    fn share_stale(&self, miner_id: &str, address: &str);
    fn share_invalid(&self, miner_id: &str, address: &str);
    fn block_share(&self, miner_id: &str, address: &str);

    fn miner_hashrate(&self, worker: &str, address: &str, hashrate: f64);
    fn pool_hashrate(&self, address: &str, hashrate: f64);
    fn var_diff(&self, worker: &str, difficulty: f64);

    /// Difficulty of one drained contribution, attributed to its miner id.
    fn miner_shares(&self, miner_id: &str, difficulty: f64);
    /// Accumulated difficulty-weighted work of an address for the settled cycle.
    fn wallet_work(&self, address: &str, work: f64);
    fn miner_reward(&self, address: &str, miner_id: &str, amount: u64);

    /// Drop label sets of an evicted worker.
    fn forget_worker(&self, worker: &str, address: &str);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ShareMetrics for NoopMetrics {
    fn share_added(&self, _: &str, _: &str) {}
    fn share_duplicate(&self, _: &str, _: &str) {}
    fn share_stale(&self, _: &str, _: &str) {}
    fn share_invalid(&self, _: &str, _: &str) {}
    fn block_share(&self, _: &str, _: &str) {}
    fn miner_hashrate(&self, _: &str, _: &str, _: f64) {}
    fn pool_hashrate(&self, _: &str, _: f64) {}
    fn var_diff(&self, _: &str, _: f64) {}
    fn miner_shares(&self, _: &str, _: f64) {}
    fn wallet_work(&self, _: &str, _: f64) {}
    fn miner_reward(&self, _: &str, _: &str, _: u64) {}
    fn forget_worker(&self, _: &str, _: &str) {}
}
