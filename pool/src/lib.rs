// kaspool: share intake and reward settlement for a Kaspa mining pool.
//
// Core: contribution ledger, miner registry, share validation, VarDiff,
// hashrate estimation, proportional reward allocation
// Surface: balance ledgers, Prometheus metrics, HTTP API, pool service

pub mod blockchain;
pub mod config;
pub mod hashrate;
pub mod metrics;
pub mod payout;
pub mod rewards;
pub mod shares;
pub mod vardiff;

pub mod api;
pub mod service;
