use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics::ShareMetrics;
use crate::shares::registry::floor_difficulty;
use crate::shares::MinerRegistry;

/// Workers younger than this in the current window are left alone.
pub const MIN_WINDOW_MS: i64 = 60_000;
/// Relative tolerance around the target share rate.
pub const DEAD_BAND: f64 = 0.10;
/// Multiplicative difficulty step per adjustment.
pub const STEP: f64 = 1.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VarDiffConfig {
    /// Target accepted shares per minute per worker.
    pub shares_per_minute: f64,
    /// Log every decision at info and publish the `var_diff` gauge.
    pub var_diff_stats: bool,
    /// Snap adjusted difficulties to powers of two.
    pub clamp_pow2: bool,
    pub interval_secs: u64,
}

impl Default for VarDiffConfig {
    fn default() -> Self {
        Self {
            shares_per_minute: 20.0,
            var_diff_stats: false,
            clamp_pow2: false,
            interval_secs: 300,
        }
    }
}

/// One applied VarDiff decision, broadcast to the protocol layer so it can
/// push the new difficulty to the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDiffAdjustment {
    pub address: String,
    pub worker: String,
    pub previous: f64,
    pub current: f64,
    pub share_rate: f64,
}

/// Next difficulty for an observed share rate (shares/minute).
///
/// When clamping, an increase floors to a power of two and a decrease ceils
/// to one; a step the clamp would turn around leaves the difficulty as is.
pub fn next_difficulty(current: f64, share_rate: f64, target: f64, clamp_pow2: bool) -> f64 {
    let next = if share_rate > target * (1.0 + DEAD_BAND) {
        let up = current * STEP;
        if clamp_pow2 {
            up.log2().floor().exp2().max(current)
        } else {
            up
        }
    } else if share_rate < target * (1.0 - DEAD_BAND) {
        let down = current / STEP;
        if clamp_pow2 {
            down.log2().ceil().exp2().min(current)
        } else {
            down
        }
    } else {
        current
    };
    floor_difficulty(next)
}

pub struct VarDiffController {
    config: VarDiffConfig,
    metrics: Arc<dyn ShareMetrics>,
}

impl VarDiffController {
    pub fn new(config: VarDiffConfig, metrics: Arc<dyn ShareMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &VarDiffConfig {
        &self.config
    }

    /// Run one adjustment pass over every worker.
    ///
    /// Returns only the workers whose difficulty actually changed; every
    /// evaluated worker has its VarDiff window restarted.
    pub fn adjust_at(&self, registry: &MinerRegistry, now: i64) -> Vec<VarDiffAdjustment> {
        let target = self.config.shares_per_minute;
        let mut changed = Vec::new();

        registry.for_each_worker(|address, stats| {
            let elapsed_ms = now - stats.var_diff_start_time;
            if elapsed_ms < MIN_WINDOW_MS {
                return;
            }

            let elapsed_minutes = elapsed_ms as f64 / 60_000.0;
            let found = stats.var_diff_shares_found;
            let share_rate = found as f64 / elapsed_minutes;
            let previous = stats.min_diff;
            let current = next_difficulty(previous, share_rate, target, self.config.clamp_pow2);

            tracing::debug!(
                "VarDiff {} ({}): shares={} elapsed={:.2}m rate={:.2}/m target={} diff {} -> {}",
                stats.worker_name, address, found, elapsed_minutes, share_rate, target, previous, current
            );

            stats.min_diff = current;
            stats.var_diff_shares_found = 0;
            stats.var_diff_start_time = now;

            if self.config.var_diff_stats {
                tracing::info!(
                    "🎚️ VarDiff {}: shares={} elapsed={:.2}m rate={:.2}/m diff={}",
                    stats.worker_name, found, elapsed_minutes, share_rate, current
                );
                self.metrics.var_diff(&stats.worker_name, current);
            }

            if current != previous {
                changed.push(VarDiffAdjustment {
                    address: address.to_string(),
                    worker: stats.worker_name.clone(),
                    previous,
                    current,
                    share_rate,
                });
            }
        });

        changed
    }
}
