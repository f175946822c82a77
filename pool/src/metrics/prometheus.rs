use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use super::ShareMetrics;

/// Share outcome counters, one per intake branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareEvent {
    Added,
    Duplicate,
    Stale,
    Invalid,
    Block,
}

/// Prometheus-backed [`ShareMetrics`] over an owned registry.
pub struct PrometheusMetrics {
    registry: Registry,

    // ── Share intake, labelled (miner_id, wallet) ──────────────────────
    added_shares: IntCounterVec,
    duplicated_shares: IntCounterVec,
    stale_shares: IntCounterVec,
    invalid_shares: IntCounterVec,
    block_shares: IntCounterVec,

    // ── Control loops ──────────────────────────────────────────────────
    miner_hashrate: GaugeVec,
    pool_hashrate: GaugeVec,
    var_diff: GaugeVec,

    // ── Settlement ─────────────────────────────────────────────────────
    miner_shares: GaugeVec,
    wallet_work: GaugeVec,
    miner_rewards: IntCounterVec,
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let share_labels = ["miner_id", "wallet"];

        Ok(Self {
            added_shares: counter_vec(&registry, "added_shares", "Shares accepted into the contribution ledger", &share_labels)?,
            duplicated_shares: counter_vec(&registry, "duplicated_shares", "Shares rejected as duplicate nonces", &share_labels)?,
            stale_shares: counter_vec(&registry, "stale_shares", "Shares rejected for a template that is no longer live", &share_labels)?,
            invalid_shares: counter_vec(&registry, "invalid_shares", "Shares whose proof misses the assigned target", &share_labels)?,
            block_shares: counter_vec(&registry, "is_block_shares", "Shares meeting the network block target", &share_labels)?,
            miner_hashrate: gauge_vec(&registry, "miner_hashrate", "Estimated worker hashrate", &["worker", "wallet"])?,
            pool_hashrate: gauge_vec(&registry, "pool_hashrate", "Estimated pool hashrate", &["pool", "wallet"])?,
            var_diff: gauge_vec(&registry, "var_diff", "Difficulty assigned by VarDiff", &["worker"])?,
            miner_shares: gauge_vec(&registry, "miner_shares_difficulty", "Settled share difficulty per miner id", &["miner_id"])?,
            wallet_work: gauge_vec(&registry, "wallet_hashrate", "Difficulty-weighted work per wallet for the last settlement", &["wallet"])?,
            miner_rewards: counter_vec(&registry, "miner_rewards_sompi", "Rewards credited per wallet (sompi)", &["wallet", "miner_id"])?,
            registry,
        })
    }

    /// Text exposition format for `/metrics` and the Pushgateway.
    pub fn render(&self) -> String {
        let enc = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = enc.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn share_vec(&self, event: ShareEvent) -> &IntCounterVec {
        match event {
            ShareEvent::Added => &self.added_shares,
            ShareEvent::Duplicate => &self.duplicated_shares,
            ShareEvent::Stale => &self.stale_shares,
            ShareEvent::Invalid => &self.invalid_shares,
            ShareEvent::Block => &self.block_shares,
        }
    }

    pub fn share_count(&self, event: ShareEvent, miner_id: &str, address: &str) -> u64 {
        self.share_vec(event).with_label_values(&[miner_id, address]).get()
    }

    pub fn hashrate_of(&self, worker: &str, address: &str) -> f64 {
        self.miner_hashrate.with_label_values(&[worker, address]).get()
    }

    pub fn pool_hashrate_of(&self, address: &str) -> f64 {
        self.pool_hashrate.with_label_values(&["pool", address]).get()
    }

    pub fn var_diff_of(&self, worker: &str) -> f64 {
        self.var_diff.with_label_values(&[worker]).get()
    }

    pub fn wallet_work_of(&self, address: &str) -> f64 {
        self.wallet_work.with_label_values(&[address]).get()
    }

    pub fn reward_of(&self, address: &str, miner_id: &str) -> u64 {
        self.miner_rewards.with_label_values(&[address, miner_id]).get()
    }
}

impl ShareMetrics for PrometheusMetrics {
    fn share_added(&self, miner_id: &str, address: &str) {
        self.added_shares.with_label_values(&[miner_id, address]).inc();
    }

    fn share_duplicate(&self, miner_id: &str, address: &str) {
        self.duplicated_shares.with_label_values(&[miner_id, address]).inc();
    }

    fn share_stale(&self, miner_id: &str, address: &str) {
        self.stale_shares.with_label_values(&[miner_id, address]).inc();
    }

    fn share_invalid(&self, miner_id: &str, address: &str) {
        self.invalid_shares.with_label_values(&[miner_id, address]).inc();
    }

    fn block_share(&self, miner_id: &str, address: &str) {
        self.block_shares.with_label_values(&[miner_id, address]).inc();
    }

    fn miner_hashrate(&self, worker: &str, address: &str, hashrate: f64) {
        self.miner_hashrate.with_label_values(&[worker, address]).set(hashrate);
    }

    fn pool_hashrate(&self, address: &str, hashrate: f64) {
        self.pool_hashrate.with_label_values(&["pool", address]).set(hashrate);
    }

    fn var_diff(&self, worker: &str, difficulty: f64) {
        self.var_diff.with_label_values(&[worker]).set(difficulty);
    }

    fn miner_shares(&self, miner_id: &str, difficulty: f64) {
        self.miner_shares.with_label_values(&[miner_id]).add(difficulty);
    }

    fn wallet_work(&self, address: &str, work: f64) {
        self.wallet_work.with_label_values(&[address]).set(work);
    }

    fn miner_reward(&self, address: &str, miner_id: &str, amount: u64) {
        self.miner_rewards.with_label_values(&[address, miner_id]).inc_by(amount);
    }

    /// Remove label set for inactive worker (cardinality control)
    fn forget_worker(&self, worker: &str, address: &str) {
        let _ = self.miner_hashrate.remove_label_values(&[worker, address]);
        let _ = self.var_diff.remove_label_values(&[worker]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_label_set() {
        let m = PrometheusMetrics::new().unwrap();
        m.share_added("rig1", "kaspa:a");
        m.share_added("rig1", "kaspa:a");
        m.share_stale("rig2", "kaspa:b");

        assert_eq!(m.share_count(ShareEvent::Added, "rig1", "kaspa:a"), 2);
        assert_eq!(m.share_count(ShareEvent::Added, "rig2", "kaspa:b"), 0);
        assert_eq!(m.share_count(ShareEvent::Stale, "rig2", "kaspa:b"), 1);
    }

    #[test]
    fn test_render_contains_registered_families() {
        let m = PrometheusMetrics::new().unwrap();
        m.share_duplicate("rig1", "kaspa:a");
        m.pool_hashrate("kaspa:pool", 12.5);
        let text = m.render();
        assert!(text.contains("duplicated_shares"));
        assert!(text.contains("pool_hashrate"));
    }

    #[test]
    fn test_forget_worker_drops_labels() {
        let m = PrometheusMetrics::new().unwrap();
        m.miner_hashrate("rig1", "kaspa:a", 100.0);
        m.forget_worker("rig1", "kaspa:a");
        assert!(!m.render().contains("rig1"));
    }
}
