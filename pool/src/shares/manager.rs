use std::sync::Arc;

use crate::blockchain::template::{target_from_difficulty, TemplateSource, TemplateState};
use crate::metrics::ShareMetrics;

use super::error::ShareError;
use super::ledger::{Contribution, ContributionLedger};
use super::registry::{MinerRegistry, MinerSnapshot};

/// Outcome of a block-producing share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOutcome {
    /// The node accepted the submitted block.
    pub accepted: bool,
}

/// Accepted share, as reported back to the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareAccepted {
    /// Difficulty the share was judged and credited at.
    pub difficulty: f64,
    pub block: Option<BlockOutcome>,
}

/// Share intake: validates submissions and feeds the ledger and the registry.
pub struct SharesManager {
    ledger: ContributionLedger,
    registry: MinerRegistry,
    metrics: Arc<dyn ShareMetrics>,
}

impl SharesManager {
    pub fn new(metrics: Arc<dyn ShareMetrics>) -> Self {
        Self {
            ledger: ContributionLedger::new(),
            registry: MinerRegistry::new(),
            metrics,
        }
    }

    pub async fn add_share<T: TemplateSource>(
        &self,
        miner_id: &str,
        address: &str,
        hash: &str,
        difficulty: f64,
        nonce: u64,
        templates: &T,
    ) -> Result<ShareAccepted, ShareError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.add_share_at(miner_id, address, hash, difficulty, nonce, templates, now)
            .await
    }

    /// Classify one share as duplicate, stale, invalid or accepted.
    ///
    /// Block submission is awaited before the difficulty check; no registry
    /// or ledger lock is held while it is in flight.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_share_at<T: TemplateSource>(
        &self,
        miner_id: &str,
        address: &str,
        hash: &str,
        difficulty: f64,
        nonce: u64,
        templates: &T,
        now: i64,
    ) -> Result<ShareAccepted, ShareError> {
        let Some(reservation) = self.ledger.reserve(nonce) else {
            tracing::debug!("Duplicate share from {} ({}): nonce {:#x}", miner_id, address, nonce);
            self.metrics.share_duplicate(miner_id, address);
            return Err(ShareError::Duplicate { nonce });
        };

        let current = self.registry.record_attempt(address, miner_id, difficulty, now);

        let Some(state) = templates.resolve(hash) else {
            tracing::debug!("Stale share from {} ({}): template {}", miner_id, address, hash);
            self.registry.with_worker(address, miner_id, |w| w.stale_shares += 1);
            self.metrics.share_stale(miner_id, address);
            return Err(ShareError::Stale { hash: hash.to_string() });
        };

        let pow = state.check_work(nonce);

        let block = if pow.is_block {
            self.metrics.block_share(miner_id, address);
            tracing::info!("💎 Block found by {} ({}) on template {}", miner_id, address, hash);

            let accepted = match templates.submit(miner_id, hash, nonce).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Block submission for {} failed: {:#}", hash, e);
                    false
                }
            };
            if accepted {
                self.registry.with_worker(address, miner_id, |w| w.blocks_found += 1);
                tracing::info!("✅ Block {} accepted by node", hash);
            } else {
                tracing::warn!("❌ Block {} was not accepted by node", hash);
            }
            Some(BlockOutcome { accepted })
        } else {
            None
        };

        if pow.proof > target_from_difficulty(current) {
            tracing::debug!("Invalid share from {} ({}) at difficulty {}", miner_id, address, current);
            self.registry.with_worker(address, miner_id, |w| w.invalid_shares += 1);
            self.metrics.share_invalid(miner_id, address);
            return Err(ShareError::Invalid { difficulty: current });
        }

        let contribution = Contribution {
            address: address.to_string(),
            miner_id: miner_id.to_string(),
            difficulty: current,
            timestamp: now,
        };
        if !self.ledger.commit(reservation, contribution) {
            // a drain ran mid-validation and the nonce was claimed again
            tracing::debug!("Duplicate share from {} ({}): nonce {:#x} reclaimed", miner_id, address, nonce);
            self.metrics.share_duplicate(miner_id, address);
            return Err(ShareError::Duplicate { nonce });
        }
        self.metrics.share_added(miner_id, address);

        Ok(ShareAccepted {
            difficulty: current,
            block,
        })
    }

    /// Read-only copy of every miner's state.
    pub fn get_miners(&self) -> Vec<MinerSnapshot> {
        self.registry.snapshot()
    }

    /// Drain the ledger; the returned contributions are handed out exactly once.
    pub fn dump_contributions(&self) -> Vec<Contribution> {
        self.ledger.drain()
    }

    pub fn registry(&self) -> &MinerRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<dyn ShareMetrics> {
        &self.metrics
    }
}
