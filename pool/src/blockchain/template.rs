/// Block templates as seen by share intake.
///
/// Share validation only needs three things from the node side: resolve a
/// template by the hash miners were given, evaluate a nonce against it, and
/// submit a block candidate. [`TemplateCache`] is the in-process source the
/// protocol layer fills from the node's template feed.

use anyhow::{anyhow, Context, Result};
use primitive_types::U256;
use sha3::{Digest, Keccak256};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Fixed-point scale applied to fractional difficulties before division.
const DIFFICULTY_SCALE_BITS: usize = 16;

/// Target of difficulty 1: 2^224 - 1.
pub fn diff1_target() -> U256 {
    (U256::one() << 224) - U256::one()
}

/// Maps a share difficulty to the target a proof must not exceed.
///
/// Non-positive or non-finite difficulties map to the difficulty-1 target
/// scaled by 2^16, i.e. the easiest representable target.
pub fn target_from_difficulty(difficulty: f64) -> U256 {
    let scaled = if difficulty.is_finite() && difficulty > 0.0 {
        (difficulty * (1u64 << DIFFICULTY_SCALE_BITS) as f64).round() as u128
    } else {
        0
    };
    (diff1_target() << DIFFICULTY_SCALE_BITS) / U256::from(scaled.max(1))
}

/// Result of evaluating one nonce against a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowCheck {
    /// Proof meets the network target.
    pub is_block: bool,
    /// Proof value; lower is better.
    pub proof: U256,
}

pub trait TemplateState: Send + Sync {
    fn check_work(&self, nonce: u64) -> PowCheck;
}

pub trait TemplateSource: Send + Sync {
    type State: TemplateState;

    /// Live template for `hash`, or `None` once it has been retired.
    fn resolve(&self, hash: &str) -> Option<Arc<Self::State>>;

    /// Submit a block-producing nonce. `Ok(true)` when the node accepted it.
    fn submit(
        &self,
        miner_id: &str,
        hash: &str,
        nonce: u64,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Serialized header with the network target it was issued under.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    pub header: Vec<u8>,
    pub network_target: U256,
}

impl HeaderTemplate {
    pub fn new(header: Vec<u8>, network_target: U256) -> Self {
        Self { header, network_target }
    }

    /// Hex Keccak-256 of the header, the id handed to miners.
    pub fn hash_hex(&self) -> String {
        hex::encode(Keccak256::digest(&self.header))
    }

    pub fn proof(&self, nonce: u64) -> U256 {
        let mut hasher = Keccak256::new();
        hasher.update(&self.header);
        hasher.update(nonce.to_le_bytes());
        U256::from_big_endian(&hasher.finalize())
    }
}

impl TemplateState for HeaderTemplate {
    fn check_work(&self, nonce: u64) -> PowCheck {
        let proof = self.proof(nonce);
        PowCheck {
            is_block: proof <= self.network_target,
            proof,
        }
    }
}

/// Block candidate handed to the node-facing task; it answers on `reply`.
#[derive(Debug)]
pub struct BlockCandidate {
    pub miner_id: String,
    pub hash: String,
    pub nonce: u64,
    pub header: Vec<u8>,
    pub reply: oneshot::Sender<bool>,
}

struct CacheInner {
    states: HashMap<String, Arc<HeaderTemplate>>,
    order: VecDeque<String>,
}

/// Bounded template cache; inserting past capacity retires the oldest template.
pub struct TemplateCache {
    inner: parking_lot::RwLock<CacheInner>,
    capacity: usize,
    submissions: mpsc::Sender<BlockCandidate>,
}

impl TemplateCache {
    pub fn new(capacity: usize, submissions: mpsc::Sender<BlockCandidate>) -> Self {
        Self {
            inner: parking_lot::RwLock::new(CacheInner {
                states: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            submissions,
        }
    }

    /// Cache a template under its header hash and return that hash.
    pub fn insert(&self, template: HeaderTemplate) -> String {
        let hash = template.hash_hex();
        let mut inner = self.inner.write();
        if inner.states.insert(hash.clone(), Arc::new(template)).is_none() {
            inner.order.push_back(hash.clone());
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.states.remove(&oldest);
                tracing::debug!("Template {} retired from cache", oldest);
            }
        }
        hash
    }

    pub fn len(&self) -> usize {
        self.inner.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TemplateSource for TemplateCache {
    type State = HeaderTemplate;

    fn resolve(&self, hash: &str) -> Option<Arc<HeaderTemplate>> {
        self.inner.read().states.get(hash).cloned()
    }

    async fn submit(&self, miner_id: &str, hash: &str, nonce: u64) -> Result<bool> {
        let template = self
            .resolve(hash)
            .ok_or_else(|| anyhow!("template {} retired before submission", hash))?;

        let (reply, answer) = oneshot::channel();
        self.submissions
            .send(BlockCandidate {
                miner_id: miner_id.to_string(),
                hash: hash.to_string(),
                nonce,
                header: template.header.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("block submission channel closed"))?;

        answer.await.context("node task dropped block candidate")
    }
}
