//! Periodic exit sweep
//!
//! Each tick refreshes every position's on-chain balance and SOL value, then
//! evaluates exits in priority order: requested teardown, profit target, stop
//! loss, max hold time. A failure on one position never stops the sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::{Position, PositionState, PositionStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::risk::{RiskAccountant, RiskGate};
use crate::trading::{
    lamports_to_sol, ExecutionEngine, ExecutionOutcome, QuoteRequest, TradeIntent, TradeSide,
};

/// Reason recorded on teardown at shutdown
pub const SHUTDOWN_REASON: &str = "shutdown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    MaxHoldTime,
    Emergency(String),
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::ProfitTarget => "profit_target",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MaxHoldTime => "max_hold_time",
            ExitReason::Emergency(_) => "emergency",
            ExitReason::Shutdown => SHUTDOWN_REASON,
        }
    }

    fn from_request(reason: &str) -> Self {
        if reason == SHUTDOWN_REASON {
            ExitReason::Shutdown
        } else {
            ExitReason::Emergency(reason.to_string())
        }
    }

    fn is_requested(&self) -> bool {
        matches!(self, ExitReason::Emergency(_) | ExitReason::Shutdown)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Emergency(detail) => write!(f, "emergency ({})", detail),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitLimits {
    /// pnl ratio at or above which to take profit
    pub profit_target: f64,
    /// pnl ratio at or below which to cut
    pub stop_loss: f64,
    pub max_hold_time_ms: u64,
}

impl ExitLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            profit_target: config.trading.profit_target,
            stop_loss: config.trading.stop_loss,
            max_hold_time_ms: config.trading.max_hold_time_ms,
        }
    }
}

/// First matching exit condition, if any
pub fn evaluate_exit(
    position: &Position,
    limits: &ExitLimits,
    now: DateTime<Utc>,
) -> Option<ExitReason> {
    match &position.state {
        PositionState::ClosingRequested { reason } => Some(ExitReason::from_request(reason)),
        PositionState::Closed => None,
        PositionState::Open | PositionState::Failed { .. } => {
            if position.pnl_ratio >= limits.profit_target {
                Some(ExitReason::ProfitTarget)
            } else if position.pnl_ratio <= limits.stop_loss {
                Some(ExitReason::StopLoss)
            } else if position.hold_time_ms(now) >= limits.max_hold_time_ms {
                Some(ExitReason::MaxHoldTime)
            } else {
                None
            }
        }
    }
}

/// Result of closing one position
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Sold {
        signature: String,
        exit_value: f64,
        pnl: f64,
        pnl_ratio: f64,
    },
    /// No tokens were left; entry dropped without a trade
    NothingToSell,
    /// Another task already removed it
    NotOpen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub closed: usize,
    pub reconciled: usize,
    pub failed: usize,
}

pub struct PositionMonitor {
    store: Arc<PositionStore>,
    engine: Arc<ExecutionEngine>,
    gate: Arc<RiskGate>,
    accountant: Arc<RiskAccountant>,
    notifier: Arc<dyn Notifier>,
    limits: ExitLimits,
    interval: Duration,
}

impl PositionMonitor {
    pub fn new(
        store: Arc<PositionStore>,
        engine: Arc<ExecutionEngine>,
        gate: Arc<RiskGate>,
        accountant: Arc<RiskAccountant>,
        notifier: Arc<dyn Notifier>,
        limits: ExitLimits,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            gate,
            accountant,
            notifier,
            limits,
            interval,
        }
    }

    pub fn limits(&self) -> &ExitLimits {
        &self.limits
    }

    /// Run sweeps until `cancel` fires
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = self.interval.as_millis() as u64, "Position monitor started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        if report.checked > 0 {
                            debug!(?report, "Sweep finished");
                        }
                    }
                }
            }

            info!("Position monitor stopped");
        })
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Utc::now();

        for mint in self.store.mints() {
            report.checked += 1;

            let position = match self.refresh(&mint, now).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    report.reconciled += 1;
                    continue;
                }
                Err(e) => {
                    warn!(mint = %mint, error = %e, "Position refresh failed");
                    self.notifier
                        .notify_error(&e.to_string(), &format!("Position Refresh - {}", mint))
                        .await;
                    report.failed += 1;
                    continue;
                }
            };

            let Some(reason) = evaluate_exit(&position, &self.limits, now) else {
                continue;
            };

            info!(
                mint = %mint,
                reason = %reason,
                pnl_ratio = position.pnl_ratio,
                "Position closure triggered"
            );
            match self.close_position(&mint, reason).await {
                Ok(CloseOutcome::Sold { .. }) => report.closed += 1,
                Ok(CloseOutcome::NothingToSell) => report.reconciled += 1,
                Ok(CloseOutcome::NotOpen) => {}
                Err(e) => {
                    error!(mint = %mint, error = %e, "Error closing position");
                    report.failed += 1;
                }
            }
        }

        self.store.prune_locks();
        report
    }

    /// Update balance and value; `None` when the position vanished on-chain and was dropped
    async fn refresh(&self, mint: &str, now: DateTime<Utc>) -> Result<Option<Position>> {
        let balance = self
            .engine
            .chain()
            .token_balance(&self.engine.wallet(), mint)
            .await?;

        let amount = match balance {
            Some(b) if b.amount > 0 => b.amount,
            _ => {
                self.reconcile(mint).await;
                return Ok(None);
            }
        };

        let quote = self
            .engine
            .router()
            .quote(&QuoteRequest {
                input_mint: mint.to_string(),
                output_mint: self.engine.settings().native_mint.clone(),
                amount,
                slippage_bps: self.engine.settings().slippage_bps,
            })
            .await;

        let updated = match quote {
            Ok(q) => self.store.update(mint, |p| {
                p.revalue(amount, lamports_to_sol(q.out_amount), now);
            }),
            Err(e) => {
                debug!(mint, error = %e, "Valuation quote failed, keeping last value");
                self.store.update(mint, |p| p.token_amount = amount)
            }
        };

        Ok(updated)
    }

    /// Drop a position whose tokens left the wallet without our sell
    async fn reconcile(&self, mint: &str) {
        let _guard = self.store.lock(mint).await;
        if let Some(position) = self.store.remove(mint) {
            warn!(mint, "No balance, removing from active positions");
            self.notifier
                .notify_position_update(
                    "closed_externally",
                    mint,
                    json!({ "entryValue": position.entry_value }),
                )
                .await;
        }
    }

    /// Sell the full balance of one position and settle it
    pub async fn close_position(&self, mint: &str, reason: ExitReason) -> Result<CloseOutcome> {
        let _guard = self.store.lock(mint).await;

        let Some(position) = self.store.get(mint) else {
            return Ok(CloseOutcome::NotOpen);
        };

        let snapshot = self.store.risk_snapshot(
            self.accountant.net_pnl().await,
            self.accountant.last_trade_time().await,
        );
        let decision = self.gate.check_exit(&snapshot, mint);
        if !decision.allowed {
            return Err(Error::RiskBlocked {
                reasons: decision.reasons,
            });
        }

        let balance = self
            .engine
            .chain()
            .token_balance(&self.engine.wallet(), mint)
            .await?;
        let amount = match balance {
            Some(b) if b.amount > 0 => b.amount,
            _ => return Ok(self.settle_empty(mint).await),
        };

        info!(mint, reason = %reason, amount, "Closing position");
        let intent = TradeIntent::sell(mint, amount, Some(position.pool_status));

        let report = match self.engine.execute(&intent).await {
            Ok(report) => report,
            Err(e) => {
                let message = e.to_string();
                if !reason.is_requested() {
                    self.store.update(mint, |p| {
                        p.state = PositionState::Failed {
                            error: message.clone(),
                        }
                    });
                }
                self.notifier
                    .notify_error(&message, &format!("Position Closure - {}", mint))
                    .await;
                return Err(e);
            }
        };

        let (signature, quoted_out) = match report.outcome {
            ExecutionOutcome::Confirmed {
                signature,
                quoted_out,
                ..
            } => (signature, quoted_out),
            ExecutionOutcome::NothingToSell => return Ok(self.settle_empty(mint).await),
        };

        let exit_value = lamports_to_sol(quoted_out);
        let ui_sold = amount as f64 / 10f64.powi(position.token_decimals as i32);
        let price = if ui_sold > 0.0 { exit_value / ui_sold } else { 0.0 };

        let trade = self
            .accountant
            .record_sell(
                mint,
                position.entry_value,
                exit_value,
                price,
                &signature,
                Utc::now(),
            )
            .await;
        self.store.remove(mint);

        let pnl = trade.pnl.unwrap_or_default();
        let pnl_ratio = trade.pnl_ratio.unwrap_or_default();
        info!(
            mint,
            reason = %reason,
            signature = %signature,
            pnl,
            pnl_ratio,
            "Position closed successfully"
        );

        self.notifier
            .notify_trade_execution(TradeSide::Sell, mint, exit_value, price, &signature)
            .await;
        match reason {
            ExitReason::ProfitTarget => {
                self.notifier
                    .notify_profit_target(mint, pnl_ratio, exit_value)
                    .await
            }
            ExitReason::StopLoss => self.notifier.notify_stop_loss(mint, pnl_ratio, exit_value).await,
            _ => {}
        }
        self.notifier
            .notify_position_update(
                "closed",
                mint,
                json!({
                    "reason": reason.to_string(),
                    "txHash": signature,
                    "balance": amount,
                    "pnl": pnl,
                    "pnlRatio": pnl_ratio,
                }),
            )
            .await;

        Ok(CloseOutcome::Sold {
            signature,
            exit_value,
            pnl,
            pnl_ratio,
        })
    }

    async fn settle_empty(&self, mint: &str) -> CloseOutcome {
        warn!(mint, "No balance to sell");
        if self.store.remove(mint).is_some() {
            self.notifier
                .notify_position_update("closed_externally", mint, json!({}))
                .await;
        }
        CloseOutcome::NothingToSell
    }

    /// Close every position now, one after another
    pub async fn close_all(&self, reason: ExitReason) -> Vec<(String, Result<CloseOutcome>)> {
        let mut results = Vec::new();
        for mint in self.store.mints() {
            let outcome = self.close_position(&mint, reason.clone()).await;
            if let Err(e) = &outcome {
                error!(mint = %mint, error = %e, "Failed to close position");
            }
            results.push((mint, outcome));
        }
        results
    }
}
