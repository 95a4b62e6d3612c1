//! Launch Sniper Library
//!
//! Watches a Solana transaction stream for new-liquidity events, buys through
//! a swap aggregator under risk limits and exits positions on price or time.

pub mod cli {
    pub mod commands;
}
pub mod config;
pub mod detector;
pub mod error;
pub mod notify;
pub mod position;
pub mod risk;
pub mod sniper;
pub mod stream;
pub mod trading;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use sniper::{Sniper, SniperParts};
