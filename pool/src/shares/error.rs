use thiserror::Error;

/// Why a submitted share was not credited.
///
/// All variants are recoverable; the protocol layer decides what the miner sees.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShareError {
    #[error("duplicate share (nonce {nonce:#018x})")]
    Duplicate { nonce: u64 },

    #[error("stale header {hash}")]
    Stale { hash: String },

    #[error("invalid share: proof misses target for difficulty {difficulty}")]
    Invalid { difficulty: f64 },
}

impl ShareError {
    /// Short code used in logs and client responses.
    pub fn code(&self) -> &'static str {
        match self {
            ShareError::Duplicate { .. } => "duplicate",
            ShareError::Stale { .. } => "stale",
            ShareError::Invalid { .. } => "invalid",
        }
    }
}
