/// Share intake
///
/// Duplicate, staleness and difficulty checks in front of the per-cycle
/// contribution ledger and the per-address miner registry.

pub mod error;
pub mod ledger;
pub mod manager;
pub mod registry;

pub use error::ShareError;
pub use ledger::{Contribution, ContributionLedger, Reservation};
pub use manager::{BlockOutcome, ShareAccepted, SharesManager};
pub use registry::{MinerRegistry, MinerSnapshot, MinerState, RecentShare, WorkerStats, SHARE_WINDOW_MS};
