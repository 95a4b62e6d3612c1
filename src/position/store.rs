//! Concurrent position registry
//!
//! One entry per mint. Writers that create or remove an entry first take the
//! mint's async lock via [`PositionStore::lock`], so a buy and a sell can never
//! interleave on the same key. In-place refreshes go through the map directly.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::detector::{PoolContext, PoolStatus};
use crate::error::{Error, Result};
use crate::risk::{PositionSummary, RiskSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PositionState {
    Open,
    /// Marked for teardown; the monitor sells on its next sweep
    ClosingRequested { reason: String },
    Closed,
    /// Last sell exhausted its retries
    Failed { error: String },
}

/// A capital-committed holding in one token
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub mint: String,
    pub entry_time: DateTime<Utc>,
    pub entry_signature: String,
    /// SOL committed on entry
    pub entry_value: f64,
    /// SOL per token at entry
    pub entry_price: f64,
    /// Held amount in raw token units
    pub token_amount: u64,
    pub token_decimals: u8,
    pub current_price: f64,
    /// SOL the full balance would fetch now
    pub current_value: f64,
    pub pnl: f64,
    pub pnl_ratio: f64,
    pub pool_status: PoolStatus,
    pub context: PoolContext,
    pub state: PositionState,
    pub last_update: DateTime<Utc>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        mint: String,
        entry_signature: String,
        entry_value: f64,
        token_amount: u64,
        token_decimals: u8,
        pool_status: PoolStatus,
        context: PoolContext,
        now: DateTime<Utc>,
    ) -> Self {
        let ui_amount = ui_amount(token_amount, token_decimals);
        let entry_price = if ui_amount > 0.0 {
            entry_value / ui_amount
        } else {
            0.0
        };

        Self {
            mint,
            entry_time: now,
            entry_signature,
            entry_value,
            entry_price,
            token_amount,
            token_decimals,
            current_price: entry_price,
            current_value: entry_value,
            pnl: 0.0,
            pnl_ratio: 1.0,
            pool_status,
            context,
            state: PositionState::Open,
            last_update: now,
        }
    }

    /// Apply a fresh balance and its quoted SOL value
    pub fn revalue(&mut self, token_amount: u64, value_sol: f64, now: DateTime<Utc>) {
        self.token_amount = token_amount;
        self.current_value = value_sol;
        let ui = ui_amount(token_amount, self.token_decimals);
        self.current_price = if ui > 0.0 { value_sol / ui } else { 0.0 };
        self.pnl = value_sol - self.entry_value;
        self.pnl_ratio = if self.entry_value > 0.0 {
            value_sol / self.entry_value
        } else {
            0.0
        };
        self.last_update = now;
    }

    pub fn hold_time_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.entry_time).num_milliseconds().max(0) as u64
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open)
    }
}

fn ui_amount(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

#[derive(Default)]
pub struct PositionStore {
    positions: DashMap<String, Position>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize create/remove on one mint
    pub async fn lock(&self, mint: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(mint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Create the entry for a confirmed buy
    pub fn insert(&self, position: Position) -> Result<()> {
        match self.positions.entry(position.mint.clone()) {
            Entry::Occupied(_) => Err(Error::PositionExists(position.mint)),
            Entry::Vacant(slot) => {
                info!(
                    mint = %position.mint,
                    entry_value = position.entry_value,
                    tokens = position.token_amount,
                    "Position opened"
                );
                slot.insert(position);
                Ok(())
            }
        }
    }

    /// Mutate an entry in place; returns the updated copy
    pub fn update<F>(&self, mint: &str, f: F) -> Option<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut entry = self.positions.get_mut(mint)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    pub fn remove(&self, mint: &str) -> Option<Position> {
        let removed = self.positions.remove(mint).map(|(_, mut p)| {
            p.state = PositionState::Closed;
            p
        });
        if removed.is_some() {
            debug!(mint, "Position removed");
        }
        removed
    }

    pub fn get(&self, mint: &str) -> Option<Position> {
        self.positions.get(mint).map(|p| p.value().clone())
    }

    pub fn contains(&self, mint: &str) -> bool {
        self.positions.contains_key(mint)
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    pub fn mints(&self) -> HashSet<String> {
        self.positions.iter().map(|p| p.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Flag every open (or failed) position for teardown; returns the flagged mints
    pub fn mark_all_closing(&self, reason: &str) -> Vec<String> {
        let mut flagged = Vec::new();
        for mut entry in self.positions.iter_mut() {
            if entry.is_open() || matches!(entry.state, PositionState::Failed { .. }) {
                entry.state = PositionState::ClosingRequested {
                    reason: reason.to_string(),
                };
                flagged.push(entry.key().clone());
            }
        }
        flagged
    }

    pub fn summary(&self) -> PositionSummary {
        let (count, total_value, total_pnl) = self
            .positions
            .iter()
            .fold((0usize, 0.0, 0.0), |(n, value, pnl), p| {
                (n + 1, value + p.current_value, pnl + p.pnl)
            });

        PositionSummary {
            active_positions: count,
            total_value,
            total_pnl,
            average_pnl: if count > 0 {
                total_pnl / count as f64
            } else {
                0.0
            },
        }
    }

    /// Counters the risk gate evaluates, combined with realized figures
    pub fn risk_snapshot(
        &self,
        net_pnl: f64,
        last_trade_time: Option<DateTime<Utc>>,
    ) -> RiskSnapshot {
        let active_mints = self.mints();
        RiskSnapshot {
            net_pnl,
            active_positions: active_mints.len(),
            last_trade_time,
            active_mints,
        }
    }

    /// Drop lock entries no task holds for mints without a position
    pub fn prune_locks(&self) {
        let positions = &self.positions;
        self.locks
            .retain(|mint, lock| Arc::strong_count(lock) > 1 || positions.contains_key(mint));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn context() -> PoolContext {
        PoolContext {
            signature: "sig".into(),
            slot: 1,
            pool_authority: crate::config::DEFAULT_POOL_AUTHORITY.into(),
            sol_reserve: 5.2,
            token_reserve: 1_000_000.0,
            token_decimals: Some(6),
        }
    }

    pub fn position(mint: &str, entry_value: f64, tokens: u64, now: DateTime<Utc>) -> Position {
        Position::open(
            mint.to_string(),
            format!("buy-{}", mint),
            entry_value,
            tokens,
            6,
            PoolStatus::RaydiumLaunchLab,
            context(),
            now,
        )
    }
}
