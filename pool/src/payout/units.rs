/// Sompi (indivisible unit) formatting for log lines.

use rust_decimal::Decimal;

/// Sompi per KAS.
pub const SOMPI_PER_KAS: u64 = 100_000_000;

const SOMPI_SCALE: u32 = 8;

/// Ticker used for amounts on `network`.
pub fn network_suffix(network: &str) -> &'static str {
    match network {
        n if n.starts_with("testnet") => "TKAS",
        n if n.starts_with("devnet") => "DKAS",
        n if n.starts_with("simnet") => "SKAS",
        _ => "KAS",
    }
}

/// Sompi amount as a decimal KAS value.
pub fn sompi_to_kas(amount: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(amount), SOMPI_SCALE).normalize()
}

/// `1250000000` on mainnet renders as `"12.5 KAS"`.
pub fn format_sompi(amount: u64, network: &str) -> String {
    format!("{} {}", sompi_to_kas(amount), network_suffix(network))
}
