/// Reward settlement
///
/// Turns one drained contribution cycle into per-address credits plus the
/// pool fee credit to the treasury.

pub mod allocator;

pub use allocator::{
    compute_allocation, work_units, Allocation, FailedCredit, Payout, RewardAllocator, Settlement,
    POOL_MINER_ID, WORK_SCALE,
};
