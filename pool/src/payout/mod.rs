/// Balance crediting for settled rewards.

pub mod balances;
pub mod units;

pub use balances::{AnyBalances, BalanceEntry, BalanceLedger, MemoryBalances, PostgresBalances};
pub use units::{format_sompi, sompi_to_kas, SOMPI_PER_KAS};
