/// Miner registry: per-address worker statistics.
///
/// Entries live in a `DashMap` sharded by address, so share intake for
/// different miners proceeds in parallel while every mutation of one miner
/// (intake, VarDiff, hashrate, eviction) happens under that entry's shard
/// lock. No registry guard is ever held across an `.await`.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Recent-share window used for hashrate estimation (10 minutes).
pub const SHARE_WINDOW_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecentShare {
    pub timestamp: i64,
    pub difficulty: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub worker_name: String,
    pub blocks_found: u64,
    pub shares_found: u64,
    pub stale_shares: u64,
    pub invalid_shares: u64,
    pub start_time: i64,
    pub last_share: i64,
    pub var_diff_start_time: i64,
    pub var_diff_shares_found: u64,
    /// Currently assigned difficulty, never below 1.
    pub min_diff: f64,
    pub recent_shares: VecDeque<RecentShare>,
}

impl WorkerStats {
    pub fn new(worker_name: &str, min_diff: f64, now: i64) -> Self {
        Self {
            worker_name: worker_name.to_string(),
            blocks_found: 0,
            shares_found: 0,
            stale_shares: 0,
            invalid_shares: 0,
            start_time: now,
            last_share: now,
            var_diff_start_time: now,
            var_diff_shares_found: 0,
            min_diff: floor_difficulty(min_diff),
            recent_shares: VecDeque::new(),
        }
    }

    /// Count a share at the current difficulty and slide the window.
    pub fn record_share(&mut self, now: i64) {
        self.shares_found += 1;
        self.var_diff_shares_found += 1;
        self.last_share = now;
        self.recent_shares.push_back(RecentShare {
            timestamp: now,
            difficulty: self.min_diff,
        });
        self.prune(now);
    }

    /// Evict window entries older than [`SHARE_WINDOW_MS`] from the front.
    pub fn prune(&mut self, now: i64) {
        while let Some(front) = self.recent_shares.front() {
            if now - front.timestamp > SHARE_WINDOW_MS {
                self.recent_shares.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Difficulty floor shared by intake and VarDiff.
pub fn floor_difficulty(difficulty: f64) -> f64 {
    if difficulty.is_finite() && difficulty > 1.0 {
        difficulty
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MinerState {
    pub workers: HashMap<String, WorkerStats>,
}

/// Read-only copy of one miner, as returned by [`MinerRegistry::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct MinerSnapshot {
    pub address: String,
    pub workers: Vec<WorkerStats>,
}

#[derive(Default)]
pub struct MinerRegistry {
    miners: DashMap<String, MinerState>,
}

impl MinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a share attempt and return the difficulty it is judged at.
    ///
    /// An unseen worker is created at `claimed_difficulty` without counting
    /// the share; a known worker counts it at its assigned difficulty.
    pub fn record_attempt(&self, address: &str, worker: &str, claimed_difficulty: f64, now: i64) -> f64 {
        let mut miner = self.miners.entry(address.to_string()).or_default();
        match miner.workers.get_mut(worker) {
            Some(stats) => {
                stats.record_share(now);
                stats.min_diff
            }
            None => {
                let stats = WorkerStats::new(worker, claimed_difficulty, now);
                let difficulty = stats.min_diff;
                miner.workers.insert(worker.to_string(), stats);
                tracing::debug!("Registry: created worker stats for {} ({})", worker, address);
                difficulty
            }
        }
    }

    /// Run `f` on a worker's stats if it is registered.
    pub fn with_worker<R>(&self, address: &str, worker: &str, f: impl FnOnce(&mut WorkerStats) -> R) -> Option<R> {
        let mut miner = self.miners.get_mut(address)?;
        miner.workers.get_mut(worker).map(f)
    }

    /// Visit every worker, one shard lock at a time.
    pub fn for_each_worker(&self, mut f: impl FnMut(&str, &mut WorkerStats)) {
        for mut entry in self.miners.iter_mut() {
            let (address, miner) = entry.pair_mut();
            for stats in miner.workers.values_mut() {
                f(address, stats);
            }
        }
    }

    pub fn difficulty(&self, address: &str, worker: &str) -> Option<f64> {
        let miner = self.miners.get(address)?;
        miner.workers.get(worker).map(|w| w.min_diff)
    }

    pub fn len(&self) -> usize {
        self.miners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.miners.is_empty()
    }

    pub fn snapshot(&self) -> Vec<MinerSnapshot> {
        let mut miners: Vec<MinerSnapshot> = self
            .miners
            .iter()
            .map(|entry| {
                let mut workers: Vec<WorkerStats> = entry.workers.values().cloned().collect();
                workers.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
                MinerSnapshot {
                    address: entry.key().clone(),
                    workers,
                }
            })
            .collect();
        miners.sort_by(|a, b| a.address.cmp(&b.address));
        miners
    }

    /// Drop workers idle for longer than `retention_ms`, and miners left
    /// without workers. Returns the evicted `(address, worker)` pairs.
    pub fn evict_idle(&self, now: i64, retention_ms: i64) -> Vec<(String, String)> {
        let mut evicted = Vec::new();
        self.miners.retain(|address, miner| {
            miner.workers.retain(|worker, stats| {
                let keep = now - stats.last_share <= retention_ms;
                if !keep {
                    evicted.push((address.clone(), worker.clone()));
                }
                keep
            });
            !miner.workers.is_empty()
        });
        evicted
    }
}
