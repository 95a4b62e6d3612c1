//! New-liquidity detection
//!
//! Two stages: a case-insensitive log scan for the mint marker, then the
//! pool authority's WSOL balance delta computed from pre/post token balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DetectorConfig;
use crate::stream::envelope::{TokenBalance, TransactionEnvelope};

/// Pool kind a launch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    #[serde(rename = "pumpfun")]
    PumpFun,
    #[serde(rename = "pumpswap")]
    PumpSwap,
    #[serde(rename = "raydium_launchlab")]
    RaydiumLaunchLab,
    #[serde(rename = "raydium_cpmm")]
    RaydiumCpmm,
}

impl PoolStatus {
    pub const ALL: [PoolStatus; 4] = [
        PoolStatus::PumpFun,
        PoolStatus::PumpSwap,
        PoolStatus::RaydiumLaunchLab,
        PoolStatus::RaydiumCpmm,
    ];

    /// On-chain program that owns pools of this kind
    pub fn program_id(&self) -> &'static str {
        match self {
            PoolStatus::PumpFun => "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
            PoolStatus::PumpSwap => "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA",
            PoolStatus::RaydiumLaunchLab => "LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj",
            PoolStatus::RaydiumCpmm => "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::PumpFun => "pumpfun",
            PoolStatus::PumpSwap => "pumpswap",
            PoolStatus::RaydiumLaunchLab => "raydium_launchlab",
            PoolStatus::RaydiumCpmm => "raydium_cpmm",
        }
    }

    /// First known program invoked in the logs
    pub fn from_logs(logs: &[String]) -> Option<Self> {
        logs.iter().find_map(|line| {
            let rest = line.strip_prefix("Program ")?;
            let program = rest.split_whitespace().next()?;
            if !rest.contains(" invoke") {
                return None;
            }
            Self::ALL.into_iter().find(|kind| kind.program_id() == program)
        })
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool metadata captured at detection time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolContext {
    pub signature: String,
    pub slot: u64,
    pub pool_authority: String,
    /// Pool authority WSOL balance after the transaction
    pub sol_reserve: f64,
    /// Counter-asset balance after the transaction
    pub token_reserve: f64,
    pub token_decimals: Option<u8>,
}

/// A transaction classified as a possible new-liquidity event
#[derive(Debug, Clone)]
pub struct LaunchCandidate {
    pub signature: String,
    pub mint: String,
    pub owner: String,
    pub pool_status: PoolStatus,
    pub sol_delta: f64,
    pub token_delta: f64,
    pub context: PoolContext,
    pub detected_at: DateTime<Utc>,
}

/// Balance movement extracted from one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceDelta {
    pub sol_pre: f64,
    pub sol_post: f64,
    pub sol_delta: f64,
    pub token_mint: Option<String>,
    pub token_owner: Option<String>,
    pub token_pre: f64,
    pub token_post: f64,
    pub token_delta: f64,
    pub token_decimals: Option<u8>,
}

impl BalanceDelta {
    /// Strictly greater than the threshold qualifies
    pub fn qualifies(&self, threshold: f64) -> bool {
        self.sol_delta > threshold
    }
}

/// Compute pool-authority and counter-asset deltas
pub fn compute_delta(
    pre: &[TokenBalance],
    post: &[TokenBalance],
    pool_authority: &str,
    wrapped_native_mint: &str,
) -> BalanceDelta {
    let mut delta = BalanceDelta::default();

    for balance in post {
        if is_counter_asset(balance, pool_authority, wrapped_native_mint) {
            delta.token_mint = Some(balance.mint.clone());
            delta.token_owner = balance.owner.clone();
            delta.token_post = balance.ui_amount();
            delta.token_decimals = balance.ui_token_amount.decimals;
        } else if is_authority_sol(balance, pool_authority, wrapped_native_mint) {
            delta.sol_post = balance.ui_amount();
        }
    }

    for balance in pre {
        if is_authority_sol(balance, pool_authority, wrapped_native_mint) {
            delta.sol_pre = balance.ui_amount();
        } else if delta.token_mint.as_deref() == Some(balance.mint.as_str())
            && balance.owner == delta.token_owner
        {
            delta.token_pre = balance.ui_amount();
        }
    }

    delta.sol_delta = delta.sol_post - delta.sol_pre;
    delta.token_delta = delta.token_post - delta.token_pre;
    delta
}

fn is_counter_asset(balance: &TokenBalance, pool_authority: &str, wsol: &str) -> bool {
    !balance.owned_by(pool_authority) && balance.mint != wsol
}

fn is_authority_sol(balance: &TokenBalance, pool_authority: &str, wsol: &str) -> bool {
    balance.owned_by(pool_authority) && balance.mint == wsol
}

/// Why a transaction was or was not turned into a candidate
#[derive(Debug, Clone)]
pub enum Verdict {
    NoMarker,
    MissingBalances,
    BelowThreshold { sol_delta: f64 },
    NoCounterAsset { sol_delta: f64 },
    PoolDisabled(PoolStatus),
    Candidate(LaunchCandidate),
}

impl Verdict {
    pub fn into_candidate(self) -> Option<LaunchCandidate> {
        match self {
            Verdict::Candidate(candidate) => Some(candidate),
            _ => None,
        }
    }
}

/// Cheap-then-precise launch filter
pub struct OpportunityDetector {
    config: DetectorConfig,
    marker: String,
}

impl OpportunityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let marker = config.mint_marker.to_lowercase();
        Self { config, marker }
    }

    /// Stage 1: case-insensitive marker scan
    pub fn has_marker(&self, logs: &[String]) -> bool {
        logs.iter().any(|line| line.to_lowercase().contains(&self.marker))
    }

    pub fn evaluate(&self, envelope: &TransactionEnvelope) -> Verdict {
        if !self.has_marker(envelope.log_messages()) {
            return Verdict::NoMarker;
        }

        let (pre, post) = match (
            envelope.meta.pre_token_balances.as_deref(),
            envelope.meta.post_token_balances.as_deref(),
        ) {
            (Some(pre), Some(post)) => (pre, post),
            _ => return Verdict::MissingBalances,
        };

        let delta = compute_delta(
            pre,
            post,
            &self.config.pool_authority,
            &self.config.wrapped_native_mint,
        );

        if !delta.qualifies(self.config.liquidity_threshold) {
            debug!(
                signature = %envelope.signature,
                sol_delta = delta.sol_delta,
                "Below liquidity threshold"
            );
            return Verdict::BelowThreshold {
                sol_delta: delta.sol_delta,
            };
        }

        let mint = match delta.token_mint.clone() {
            Some(mint) => mint,
            None => {
                return Verdict::NoCounterAsset {
                    sol_delta: delta.sol_delta,
                }
            }
        };

        // The subscription filters on the launchpad authority, so unknown
        // program sets are launchpad pools.
        let pool_status =
            PoolStatus::from_logs(envelope.log_messages()).unwrap_or(PoolStatus::RaydiumLaunchLab);
        if !self.config.pools.is_enabled(pool_status) {
            return Verdict::PoolDisabled(pool_status);
        }

        Verdict::Candidate(LaunchCandidate {
            signature: envelope.signature.clone(),
            mint,
            owner: delta.token_owner.clone().unwrap_or_default(),
            pool_status,
            sol_delta: delta.sol_delta,
            token_delta: delta.token_delta,
            context: PoolContext {
                signature: envelope.signature.clone(),
                slot: envelope.slot,
                pool_authority: self.config.pool_authority.clone(),
                sol_reserve: delta.sol_post,
                token_reserve: delta.token_post,
                token_decimals: delta.token_decimals,
            },
            detected_at: Utc::now(),
        })
    }

    pub fn inspect(&self, envelope: &TransactionEnvelope) -> Option<LaunchCandidate> {
        self.evaluate(envelope).into_candidate()
    }
}
