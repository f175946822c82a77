/// Windowed hashrate estimation over the registry's recent-share windows.
///
/// Each pass publishes one estimate per worker with recent activity and the
/// sum of those as the pool estimate, then evicts workers that have been
/// idle for longer than the retention period.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics::ShareMetrics;
use crate::shares::registry::{RecentShare, SHARE_WINDOW_MS};
use crate::shares::MinerRegistry;

/// Per-share lower bound of the dynamic window.
const MS_PER_SHARE: i64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashrateConfig {
    pub interval_secs: u64,
}

impl Default for HashrateConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerHashrate {
    pub address: String,
    pub worker: String,
    pub hashrate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HashrateReport {
    /// Unix milliseconds of the pass.
    pub timestamp: i64,
    pub workers: Vec<WorkerHashrate>,
    pub pool: f64,
}

/// Recency-weighted estimate for one worker's window, in difficulty/second.
///
/// `None` when no share falls inside the dynamic window or when the relevant
/// shares span no time at all.
pub fn estimate(shares: impl ExactSizeIterator<Item = RecentShare>, now: i64) -> Option<f64> {
    let window = SHARE_WINDOW_MS.min(shares.len() as i64 * MS_PER_SHARE);
    let relevant: Vec<RecentShare> = shares.filter(|s| now - s.timestamp <= window).collect();

    let k = relevant.len();
    let oldest = relevant.first()?.timestamp;
    let elapsed_secs = (now - oldest) as f64 / 1_000.0;
    if elapsed_secs <= 0.0 {
        return None;
    }

    let (weighted, weights) = relevant
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, total), (i, share)| {
            let weight = 1.0 + i as f64 / k as f64;
            (sum + share.difficulty * weight, total + weight)
        });
    let avg_difficulty = weighted / weights;

    Some(avg_difficulty * k as f64 / elapsed_secs)
}

pub struct HashrateEstimator {
    pool_address: String,
    retention_ms: i64,
    metrics: Arc<dyn ShareMetrics>,
}

impl HashrateEstimator {
    pub fn new(pool_address: String, retention_secs: u64, metrics: Arc<dyn ShareMetrics>) -> Self {
        Self {
            pool_address,
            retention_ms: i64::try_from(retention_secs.saturating_mul(1_000)).unwrap_or(i64::MAX),
            metrics,
        }
    }

    pub fn estimate_at(&self, registry: &MinerRegistry, now: i64) -> HashrateReport {
        let mut workers = Vec::new();

        registry.for_each_worker(|address, stats| {
            if let Some(hashrate) = estimate(stats.recent_shares.iter().copied(), now) {
                self.metrics.miner_hashrate(&stats.worker_name, address, hashrate);
                workers.push(WorkerHashrate {
                    address: address.to_string(),
                    worker: stats.worker_name.clone(),
                    hashrate,
                });
            }
        });

        let pool: f64 = workers.iter().map(|w| w.hashrate).sum();
        self.metrics.pool_hashrate(&self.pool_address, pool);
        tracing::debug!("Hashrate pass: {} active workers, pool {:.2}", workers.len(), pool);

        for (address, worker) in registry.evict_idle(now, self.retention_ms) {
            tracing::info!("🧹 Evicted idle worker {} ({})", worker, address);
            self.metrics.forget_worker(&worker, &address);
        }

        HashrateReport {
            timestamp: now,
            workers,
            pool,
        }
    }
}
