//! Admission gate
//!
//! Pure function over a snapshot of risk counters. Every check runs so the
//! caller sees all violations at once, and evaluation has no side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::Config;

/// Reasons a trade is not admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBlock {
    DailyLossLimitReached { net_pnl: f64 },
    SingleTradeLimitExceeded { amount_sol: f64, max_sol: f64 },
    MaxPositionsReached { current: usize, max: usize },
    CooldownActive { remaining_ms: u64 },
    PositionAlreadyOpen { mint: String },
    PositionNotOpen { mint: String },
}

impl RiskBlock {
    /// Get human-readable description
    pub fn description(&self) -> String {
        match self {
            RiskBlock::DailyLossLimitReached { net_pnl } => {
                format!("Daily loss limit reached: {:.4} SOL", net_pnl)
            }
            RiskBlock::SingleTradeLimitExceeded { amount_sol, max_sol } => {
                format!(
                    "Trade amount {} SOL exceeds single trade limit {} SOL",
                    amount_sol, max_sol
                )
            }
            RiskBlock::MaxPositionsReached { current, max } => {
                format!("Maximum positions limit reached: {}/{}", current, max)
            }
            RiskBlock::CooldownActive { remaining_ms } => {
                format!(
                    "Trade cooldown active: {}s remaining",
                    remaining_ms.div_ceil(1000)
                )
            }
            RiskBlock::PositionAlreadyOpen { mint } => {
                format!("Token {} already has an active position", mint)
            }
            RiskBlock::PositionNotOpen { mint } => {
                format!("Token {} has no open position", mint)
            }
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub blocks: Vec<RiskBlock>,
}

impl RiskDecision {
    fn from_blocks(blocks: Vec<RiskBlock>) -> Self {
        Self {
            allowed: blocks.is_empty(),
            reasons: blocks.iter().map(RiskBlock::description).collect(),
            blocks,
        }
    }
}

/// Shared counters the gate reads
#[derive(Debug, Clone, Default)]
pub struct RiskSnapshot {
    pub net_pnl: f64,
    pub active_positions: usize,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub active_mints: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub max_daily_loss: f64,
    pub max_single_loss: f64,
    pub max_positions: usize,
    pub trade_cooldown_ms: u64,
}

impl RiskLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_daily_loss: config.risk.max_daily_loss,
            max_single_loss: config.risk.max_single_loss,
            max_positions: config.trading.max_positions,
            trade_cooldown_ms: config.risk.trade_cooldown_ms,
        }
    }
}

pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Admission check for a new buy
    pub fn check(
        &self,
        snapshot: &RiskSnapshot,
        amount_sol: f64,
        mint: &str,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let limits = &self.limits;
        let mut blocks = Vec::new();

        if snapshot.net_pnl <= -limits.max_daily_loss {
            blocks.push(RiskBlock::DailyLossLimitReached {
                net_pnl: snapshot.net_pnl,
            });
        }

        if amount_sol > limits.max_single_loss {
            blocks.push(RiskBlock::SingleTradeLimitExceeded {
                amount_sol,
                max_sol: limits.max_single_loss,
            });
        }

        if snapshot.active_positions >= limits.max_positions {
            blocks.push(RiskBlock::MaxPositionsReached {
                current: snapshot.active_positions,
                max: limits.max_positions,
            });
        }

        if let Some(last) = snapshot.last_trade_time {
            let elapsed_ms = (now - last).num_milliseconds().max(0) as u64;
            if elapsed_ms < limits.trade_cooldown_ms {
                blocks.push(RiskBlock::CooldownActive {
                    remaining_ms: limits.trade_cooldown_ms - elapsed_ms,
                });
            }
        }

        if snapshot.active_mints.contains(mint) {
            blocks.push(RiskBlock::PositionAlreadyOpen {
                mint: mint.to_string(),
            });
        }

        RiskDecision::from_blocks(blocks)
    }

    /// Exit re-check: the position must still be open. Loss limits never block a sell.
    pub fn check_exit(&self, snapshot: &RiskSnapshot, mint: &str) -> RiskDecision {
        let mut blocks = Vec::new();
        if !snapshot.active_mints.contains(mint) {
            blocks.push(RiskBlock::PositionNotOpen {
                mint: mint.to_string(),
            });
        }
        RiskDecision::from_blocks(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn gate() -> RiskGate {
        RiskGate::new(RiskLimits {
            max_daily_loss: 1.0,
            max_single_loss: 0.5,
            max_positions: 2,
            trade_cooldown_ms: 5000,
        })
    }

    #[test]
    fn test_clean_state_allows() {
        let decision = gate().check(&RiskSnapshot::default(), 0.1, "mint", Utc::now());
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_all_violations_reported_in_order() {
        let now = Utc::now();
        let snapshot = RiskSnapshot {
            net_pnl: -1.2,
            active_positions: 2,
            last_trade_time: Some(now - Duration::milliseconds(1500)),
            active_mints: ["mint".to_string()].into_iter().collect(),
        };

        let decision = gate().check(&snapshot, 0.75, "mint", now);
        assert!(!decision.allowed);
        assert_eq!(
            decision.reasons,
            vec![
                "Daily loss limit reached: -1.2000 SOL".to_string(),
                "Trade amount 0.75 SOL exceeds single trade limit 0.5 SOL".to_string(),
                "Maximum positions limit reached: 2/2".to_string(),
                "Trade cooldown active: 4s remaining".to_string(),
                "Token mint already has an active position".to_string(),
            ]
        );
    }

    #[test]
    fn test_daily_loss_boundary_blocks() {
        let snapshot = RiskSnapshot {
            net_pnl: -1.0,
            ..RiskSnapshot::default()
        };
        let decision = gate().check(&snapshot, 0.1, "mint", Utc::now());
        assert_eq!(
            decision.blocks,
            vec![RiskBlock::DailyLossLimitReached { net_pnl: -1.0 }]
        );
    }

    #[test]
    fn test_cooldown_expires() {
        let now = Utc::now();
        let snapshot = RiskSnapshot {
            last_trade_time: Some(now - Duration::milliseconds(5000)),
            ..RiskSnapshot::default()
        };
        assert!(gate().check(&snapshot, 0.1, "mint", now).allowed);
    }

    #[test]
    fn test_check_is_idempotent() {
        let now = Utc::now();
        let snapshot = RiskSnapshot {
            net_pnl: -0.3,
            active_positions: 1,
            last_trade_time: Some(now - Duration::milliseconds(100)),
            active_mints: ["a".to_string()].into_iter().collect(),
        };
        let gate = gate();

        let first = gate.check(&snapshot, 0.2, "a", now);
        let second = gate.check(&snapshot, 0.2, "a", now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_exit_recheck() {
        let snapshot = RiskSnapshot {
            net_pnl: -5.0,
            active_positions: 1,
            last_trade_time: Some(Utc::now()),
            active_mints: ["open".to_string()].into_iter().collect(),
        };
        let gate = gate();
        assert!(gate.check_exit(&snapshot, "open").allowed);
        assert!(!gate.check_exit(&snapshot, "gone").allowed);
    }
}
