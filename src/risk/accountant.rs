//! Realized PnL accounting, daily statistics and risk classification

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::notify::{NotificationKind, Notifier};
use crate::trading::TradeSide;

/// Daily trading statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_trades: u32,
    pub profitable_trades: u32,
    pub losing_trades: u32,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_pnl: f64,
    pub start_time: DateTime<Utc>,
}

impl DailyStats {
    pub fn new(date: NaiveDate, start_time: DateTime<Utc>) -> Self {
        Self {
            date,
            total_trades: 0,
            profitable_trades: 0,
            losing_trades: 0,
            total_profit: 0.0,
            total_loss: 0.0,
            net_pnl: 0.0,
            start_time,
        }
    }

    /// Count one closed trade
    pub fn record(&mut self, pnl: f64, profitable: bool) {
        self.total_trades += 1;
        if profitable {
            self.profitable_trades += 1;
            self.total_profit += pnl;
        } else {
            self.losing_trades += 1;
            self.total_loss += pnl.abs();
        }
        self.net_pnl += pnl;
    }

    /// Percentage of closed trades that were profitable
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.profitable_trades as f64 / self.total_trades as f64 * 100.0
    }

    pub fn average_profit(&self) -> f64 {
        if self.profitable_trades == 0 {
            return 0.0;
        }
        self.total_profit / self.profitable_trades as f64
    }

    pub fn average_loss(&self) -> f64 {
        if self.losing_trades == 0 {
            return 0.0;
        }
        self.total_loss / self.losing_trades as f64
    }
}

/// One completed trade; never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub side: TradeSide,
    pub mint: String,
    /// SOL committed (buy) or received (sell)
    pub amount: f64,
    pub price: f64,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Daily stats plus derived figures
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    #[serde(flatten)]
    pub stats: DailyStats,
    pub uptime_secs: i64,
    pub win_rate: f64,
    pub average_profit: f64,
    pub average_loss: f64,
}

/// Open-position aggregate used by risk scoring
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct PositionSummary {
    pub active_positions: usize,
    pub total_value: f64,
    pub total_pnl: f64,
    pub average_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub daily_stats: DailyReport,
    pub position_summary: PositionSummary,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

/// Weighted risk score from loss proximity, concentration and win rate
pub fn risk_score(
    stats: &DailyStats,
    active_positions: usize,
    max_daily_loss: f64,
    max_positions: usize,
) -> u32 {
    let mut score = 0;

    if stats.net_pnl <= -max_daily_loss * 0.9 {
        score += 30;
    } else if stats.net_pnl <= -max_daily_loss * 0.7 {
        score += 20;
    } else if stats.net_pnl <= -max_daily_loss * 0.5 {
        score += 10;
    }

    if active_positions as f64 >= max_positions as f64 * 0.8 {
        score += 20;
    }

    let win_rate = stats.win_rate();
    if win_rate < 30.0 {
        score += 25;
    } else if win_rate < 50.0 {
        score += 15;
    }

    score
}

pub fn risk_level(score: u32) -> RiskLevel {
    if score >= 60 {
        RiskLevel::High
    } else if score >= 30 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Limits the accountant scores against
#[derive(Debug, Clone)]
pub struct AccountantLimits {
    pub max_daily_loss: f64,
    pub max_positions: usize,
    /// Fraction of `max_daily_loss` that fires a warning
    pub warning_ratio: f64,
}

impl AccountantLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_daily_loss: config.risk.max_daily_loss,
            max_positions: config.trading.max_positions,
            warning_ratio: config.risk.warning_ratio,
        }
    }
}

struct AccountantState {
    today: DailyStats,
    history: BTreeMap<NaiveDate, DailyStats>,
    trades: Vec<TradeRecord>,
    last_trade_time: Option<DateTime<Utc>>,
}

pub struct RiskAccountant {
    limits: AccountantLimits,
    notifier: Arc<dyn Notifier>,
    state: RwLock<AccountantState>,
}

fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

impl RiskAccountant {
    pub fn new(limits: AccountantLimits, notifier: Arc<dyn Notifier>) -> Self {
        Self::starting_at(limits, notifier, Utc::now())
    }

    pub fn starting_at(
        limits: AccountantLimits,
        notifier: Arc<dyn Notifier>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            limits,
            notifier,
            state: RwLock::new(AccountantState {
                today: DailyStats::new(local_date(now), now),
                history: BTreeMap::new(),
                trades: Vec::new(),
                last_trade_time: None,
            }),
        }
    }

    pub fn limits(&self) -> &AccountantLimits {
        &self.limits
    }

    /// Record a confirmed buy
    pub async fn record_buy(
        &self,
        mint: &str,
        amount_sol: f64,
        price: f64,
        signature: &str,
        at: DateTime<Utc>,
    ) -> TradeRecord {
        let trade = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            side: TradeSide::Buy,
            mint: mint.to_string(),
            amount: amount_sol,
            price,
            signature: signature.to_string(),
            timestamp: at,
            pnl: None,
            pnl_ratio: None,
        };

        let mut state = self.state.write().await;
        state.last_trade_time = Some(state.last_trade_time.map_or(at, |t| t.max(at)));
        state.trades.push(trade.clone());
        debug!(mint = %mint, amount_sol, "Buy recorded");
        trade
    }

    /// Record a confirmed sell and update the stats of the day the trade happened
    pub async fn record_sell(
        &self,
        mint: &str,
        entry_value: f64,
        exit_value: f64,
        price: f64,
        signature: &str,
        at: DateTime<Utc>,
    ) -> TradeRecord {
        let pnl = exit_value - entry_value;
        let pnl_ratio = if entry_value > 0.0 {
            exit_value / entry_value
        } else {
            0.0
        };

        let trade = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            side: TradeSide::Sell,
            mint: mint.to_string(),
            amount: exit_value,
            price,
            signature: signature.to_string(),
            timestamp: at,
            pnl: Some(pnl),
            pnl_ratio: Some(pnl_ratio),
        };

        let (net_pnl, rolled) = {
            let mut state = self.state.write().await;
            let date = local_date(at);

            let rolled = if date > state.today.date {
                Some(Self::roll(&mut state, at))
            } else {
                None
            };

            let stats = if date == state.today.date {
                &mut state.today
            } else {
                state
                    .history
                    .entry(date)
                    .or_insert_with(|| DailyStats::new(date, at))
            };
            stats.record(pnl, pnl_ratio > 1.0);

            state.last_trade_time = Some(state.last_trade_time.map_or(at, |t| t.max(at)));
            state.trades.push(trade.clone());
            (state.today.net_pnl, rolled)
        };

        info!(
            mint = %mint,
            pnl,
            pnl_ratio,
            "Realized {:.4} SOL ({:.2}x)",
            pnl,
            pnl_ratio
        );

        if let Some(previous) = rolled {
            self.announce_rollover(&previous).await;
        }

        if net_pnl <= -self.limits.max_daily_loss * self.limits.warning_ratio {
            warn!(net_pnl, "Daily loss limit approaching");
            self.notifier
                .send_notification(
                    &format!("Daily loss limit approaching: {:.4} SOL", net_pnl),
                    NotificationKind::Warning,
                    json!({ "netPnL": net_pnl, "maxDailyLoss": self.limits.max_daily_loss }),
                )
                .await;
        }

        trade
    }

    fn roll(state: &mut AccountantState, now: DateTime<Utc>) -> DailyStats {
        let fresh = DailyStats::new(local_date(now), now);
        let previous = std::mem::replace(&mut state.today, fresh);
        state.history.insert(previous.date, previous.clone());
        previous
    }

    async fn announce_rollover(&self, previous: &DailyStats) {
        info!(
            date = %previous.date,
            trades = previous.total_trades,
            net_pnl = previous.net_pnl,
            "Daily stats reset"
        );
        self.notifier
            .send_notification(
                &format!(
                    "Daily trading session ended. Net PnL: {:.4} SOL",
                    previous.net_pnl
                ),
                NotificationKind::Info,
                json!({ "previousStats": previous }),
            )
            .await;
    }

    /// Start a new day if `now` falls after the current one
    pub async fn rollover(&self, now: DateTime<Utc>) -> Option<DailyStats> {
        let previous = {
            let mut state = self.state.write().await;
            if local_date(now) <= state.today.date {
                return None;
            }
            Self::roll(&mut state, now)
        };
        self.announce_rollover(&previous).await;
        Some(previous)
    }

    pub async fn net_pnl(&self) -> f64 {
        self.state.read().await.today.net_pnl
    }

    pub async fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_trade_time
    }

    pub async fn today(&self) -> DailyStats {
        self.state.read().await.today.clone()
    }

    /// Stats of a past or current day
    pub async fn stats_for(&self, date: NaiveDate) -> Option<DailyStats> {
        let state = self.state.read().await;
        if state.today.date == date {
            Some(state.today.clone())
        } else {
            state.history.get(&date).cloned()
        }
    }

    pub async fn trade_history(&self) -> Vec<TradeRecord> {
        self.state.read().await.trades.clone()
    }

    pub async fn daily_report(&self, now: DateTime<Utc>) -> DailyReport {
        let stats = self.today().await;
        DailyReport {
            uptime_secs: (now - stats.start_time).num_seconds().max(0),
            win_rate: stats.win_rate(),
            average_profit: stats.average_profit(),
            average_loss: stats.average_loss(),
            stats,
        }
    }

    pub async fn risk_metrics(&self, positions: PositionSummary, now: DateTime<Utc>) -> RiskMetrics {
        let report = self.daily_report(now).await;
        let limits = &self.limits;

        let score = risk_score(
            &report.stats,
            positions.active_positions,
            limits.max_daily_loss,
            limits.max_positions,
        );

        let mut recommendations = Vec::new();
        if report.stats.net_pnl <= -limits.max_daily_loss * limits.warning_ratio {
            recommendations
                .push("Consider reducing position sizes or stopping trading for the day".to_string());
        }
        if positions.active_positions as f64 >= limits.max_positions as f64 * 0.8 {
            recommendations.push(
                "Approaching maximum position limit - consider closing some positions".to_string(),
            );
        }
        if report.stats.total_trades > 0 && report.win_rate < 40.0 {
            recommendations
                .push("Low win rate - review trading strategy and risk parameters".to_string());
        }
        if positions.total_pnl < 0.0 {
            recommendations.push(
                "Overall portfolio in loss - consider implementing stricter stop losses".to_string(),
            );
        }

        RiskMetrics {
            daily_stats: report,
            position_summary: positions,
            risk_score: score,
            risk_level: risk_level(score),
            recommendations,
        }
    }
}
