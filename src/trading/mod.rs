//! Trading module - swap routing, signing and submission
//!
//! Supports three submission routes:
//! - Standard RPC (flat priority fee)
//! - Tip relay (explicit tip transfer appended before signing)
//! - Bundle tip (tip passed to the routing service)

pub mod chain;
pub mod engine;
pub mod router;
pub mod submit;
pub mod tip;

use serde::{Deserialize, Serialize};

use crate::detector::PoolStatus;

pub use chain::{ChainClient, RpcChainClient, TokenAmount};
pub use engine::{
    AttemptRecord, AttemptStatus, ExecutionEngine, ExecutionOutcome, ExecutionReport,
    ExecutionSettings,
};
pub use router::{JupiterRouter, PrioritizationFee, QuoteRequest, QuoteResponse, SwapRouter};
pub use submit::{DryRunSubmitter, RelaySubmitter, RpcSubmitter, Submitter};

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A swap to execute
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub side: TradeSide,
    pub mint: String,
    /// Lamports for a buy, raw token units for a sell
    pub amount: u64,
    pub pool_status: Option<PoolStatus>,
}

impl TradeIntent {
    pub fn buy(mint: impl Into<String>, lamports: u64, pool_status: Option<PoolStatus>) -> Self {
        Self {
            side: TradeSide::Buy,
            mint: mint.into(),
            amount: lamports,
            pool_status,
        }
    }

    pub fn sell(mint: impl Into<String>, raw_amount: u64, pool_status: Option<PoolStatus>) -> Self {
        Self {
            side: TradeSide::Sell,
            mint: mint.into(),
            amount: raw_amount,
            pool_status,
        }
    }
}

/// Convert SOL to lamports
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round().max(0.0) as u64
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_strings() {
        assert_eq!(TradeSide::Buy.as_str(), "buy");
        assert_eq!(TradeSide::Sell.to_string(), "sell");
        assert_eq!(serde_json::to_string(&TradeSide::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn test_lamport_conversion() {
        assert_eq!(sol_to_lamports(0.1), 100_000_000);
        assert_eq!(sol_to_lamports(-1.0), 0);
        assert!((lamports_to_sol(250_000_000) - 0.25).abs() < 1e-12);
    }
}
