//! Orchestrator
//!
//! Owns every service object and wires the pipeline:
//!
//! ```text
//! StreamIngestor ──queue──▶ consumer ─▶ RiskGate ─▶ ExecutionEngine(BUY) ─▶ PositionStore
//!                                                                               │
//! PositionMonitor ◀──────────────── sweep ◀─────────────────────────────────────┘
//!        └─▶ RiskGate(exit) ─▶ ExecutionEngine(SELL) ─▶ RiskAccountant ─▶ Notifier
//! ```
//!
//! The consumer awaits each buy before taking the next candidate, so a slow
//! buy delays the queue; the bounded queue then pushes back on ingestion.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use solana_sdk::signature::Keypair;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detector::{LaunchCandidate, OpportunityDetector};
use crate::error::{Error, Result};
use crate::notify::{NotificationKind, Notifier};
use crate::position::{ExitLimits, ExitReason, Position, PositionMonitor, PositionStore};
use crate::risk::{
    AccountantLimits, DailyReport, PositionSummary, RiskAccountant, RiskGate, RiskLevel,
    RiskLimits, RiskMetrics,
};
use crate::stream::{IngestorSnapshot, StreamIngestor, SubscribeRequest, TransactionSource};
use crate::trading::{
    sol_to_lamports, ChainClient, ExecutionEngine, ExecutionOutcome, ExecutionSettings,
    Submitter, SwapRouter, TradeIntent, TradeSide,
};
use crate::wallet;

/// External collaborators the orchestrator is built from
pub struct SniperParts {
    pub source: Arc<dyn TransactionSource>,
    pub router: Arc<dyn SwapRouter>,
    pub chain: Arc<dyn ChainClient>,
    pub submitter: Arc<dyn Submitter>,
    pub keypair: Arc<Keypair>,
    pub notifier: Arc<dyn Notifier>,
}

/// Result of `emergency_close_all` per position
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmergencyMark {
    pub mint: String,
    pub status: &'static str,
    pub reason: String,
}

/// Background tasks started by [`Sniper::start`]
pub struct SniperTasks {
    ingestor: JoinHandle<()>,
    consumer: JoinHandle<()>,
    monitor: JoinHandle<()>,
    risk_monitor: JoinHandle<()>,
    rollover: JoinHandle<()>,
}

pub struct Sniper {
    config: Config,
    ingestor: StreamIngestor,
    gate: Arc<RiskGate>,
    accountant: Arc<RiskAccountant>,
    store: Arc<PositionStore>,
    engine: Arc<ExecutionEngine>,
    monitor: Arc<PositionMonitor>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
}

impl Sniper {
    pub fn new(config: Config, parts: SniperParts) -> Result<Self> {
        let detector = Arc::new(OpportunityDetector::new(config.detector.clone()));
        let ingestor = StreamIngestor::new(
            parts.source,
            detector,
            SubscribeRequest::from_config(&config.stream),
            Duration::from_millis(config.stream.reconnect_delay_ms),
        );

        let gate = Arc::new(RiskGate::new(RiskLimits::from_config(&config)));
        let accountant = Arc::new(RiskAccountant::new(
            AccountantLimits::from_config(&config),
            parts.notifier.clone(),
        ));
        let store = Arc::new(PositionStore::new());
        let engine = Arc::new(ExecutionEngine::new(
            parts.router,
            parts.chain,
            parts.submitter,
            parts.keypair,
            ExecutionSettings::from_config(&config)?,
        ));
        let monitor = Arc::new(PositionMonitor::new(
            store.clone(),
            engine.clone(),
            gate.clone(),
            accountant.clone(),
            parts.notifier.clone(),
            ExitLimits::from_config(&config),
            Duration::from_millis(config.monitor.interval_ms),
        ));

        Ok(Self {
            config,
            ingestor,
            gate,
            accountant,
            store,
            engine,
            monitor,
            notifier: parts.notifier,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Startup wallet check; returns the balance in lamports
    pub async fn preflight(&self) -> Result<u64> {
        let lamports = self.engine.chain().sol_balance(&self.engine.wallet()).await?;
        wallet::ensure_balance(lamports, self.config.trading.min_wallet_balance_sol)?;
        Ok(lamports)
    }

    /// Spawn ingestion, the candidate consumer and the periodic tasks
    pub fn start(self: &Arc<Self>) -> SniperTasks {
        let (tx, rx) = async_channel::bounded(self.config.stream.queue_capacity.max(1));

        let ingestor = self.ingestor.start(tx);

        let consumer = {
            let this = self.clone();
            tokio::spawn(async move { this.consume(rx).await })
        };

        let monitor = self.monitor.clone().start(self.cancel.child_token());
        let risk_monitor = self.spawn_risk_monitor();
        let rollover = self.spawn_rollover();

        SniperTasks {
            ingestor,
            consumer,
            monitor,
            risk_monitor,
            rollover,
        }
    }

    async fn consume(&self, queue: async_channel::Receiver<LaunchCandidate>) {
        info!("Candidate consumer started");
        loop {
            let candidate = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Ok(candidate) => candidate,
                    Err(_) => break,
                },
            };

            let mint = candidate.mint.clone();
            match self.handle_candidate(candidate).await {
                Ok(position) => debug!(mint = %position.mint, "Candidate bought"),
                Err(e) if e.is_risk_block() => info!(mint = %mint, "{}", e),
                Err(e @ Error::InsufficientBalance { .. }) => warn!(mint = %mint, "{}", e),
                Err(e) => error!(mint = %mint, error = %e, "Error processing new token"),
            }
        }
        info!("Candidate consumer stopped");
    }

    /// Gate, buy and register one candidate
    pub async fn handle_candidate(&self, candidate: LaunchCandidate) -> Result<Position> {
        let amount_sol = self.config.trading.sniper_amount_sol;
        let mint = candidate.mint.clone();

        info!(
            mint = %mint,
            pool = %candidate.pool_status,
            sol_delta = candidate.sol_delta,
            signature = %candidate.signature,
            "New launch candidate"
        );

        self.admit(&mint, amount_sol).await?;

        let balance = self.engine.chain().sol_balance(&self.engine.wallet()).await;
        if let Err(e) = balance.and_then(|lamports| wallet::ensure_balance(lamports, amount_sol)) {
            self.notifier
                .notify_error(&e.to_string(), &format!("Balance Check - {}", mint))
                .await;
            return Err(e);
        }

        let _guard = self.store.lock(&mint).await;
        // Exits may have changed the counters since the first check
        self.admit(&mint, amount_sol).await?;

        let intent = TradeIntent::buy(
            mint.clone(),
            sol_to_lamports(amount_sol),
            Some(candidate.pool_status),
        );
        let report = match self.engine.execute(&intent).await {
            Ok(report) => report,
            Err(e) => {
                self.notifier
                    .notify_error(&e.to_string(), &format!("Token Buy - {}", mint))
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
            ExecutionOutcome::NothingToSell => {
                return Err(Error::Internal("buy ended without a signature".into()))
            }
        };

        let fallback_decimals = candidate.context.token_decimals.unwrap_or(6);
        let (token_amount, decimals) = match self
            .engine
            .chain()
            .token_balance(&self.engine.wallet(), &mint)
            .await
        {
            Ok(Some(b)) if b.amount > 0 => (b.amount, b.decimals),
            Ok(_) => (quoted_out, fallback_decimals),
            Err(e) => {
                warn!(mint = %mint, error = %e, "Post-buy balance read failed, using quote");
                (quoted_out, fallback_decimals)
            }
        };

        let now = Utc::now();
        let position = Position::open(
            mint.clone(),
            signature.clone(),
            amount_sol,
            token_amount,
            decimals,
            candidate.pool_status,
            candidate.context,
            now,
        );

        self.accountant
            .record_buy(&mint, amount_sol, position.entry_price, &signature, now)
            .await;
        self.store.insert(position.clone())?;

        info!(
            mint = %mint,
            signature = %signature,
            attempts = report.attempts.len(),
            tokens = token_amount,
            "Buy successful"
        );
        self.notifier
            .notify_trade_execution(TradeSide::Buy, &mint, amount_sol, position.entry_price, &signature)
            .await;
        self.notifier
            .notify_position_update(
                "opened",
                &mint,
                json!({
                    "entryValue": amount_sol,
                    "entryPrice": position.entry_price,
                    "tokenAmount": token_amount,
                    "poolStatus": candidate.pool_status.as_str(),
                    "txHash": signature,
                }),
            )
            .await;

        Ok(position)
    }

    async fn admit(&self, mint: &str, amount_sol: f64) -> Result<()> {
        let snapshot = self.store.risk_snapshot(
            self.accountant.net_pnl().await,
            self.accountant.last_trade_time().await,
        );
        let decision = self.gate.check(&snapshot, amount_sol, mint, Utc::now());
        if decision.allowed {
            Ok(())
        } else {
            Err(Error::RiskBlocked {
                reasons: decision.reasons,
            })
        }
    }

    fn spawn_risk_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let period = Duration::from_millis(self.config.risk.monitor_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => { let _ = this.check_risk().await; }
                }
            }
        })
    }

    /// One risk-monitor pass
    pub async fn check_risk(&self) -> RiskMetrics {
        let metrics = self.get_risk_metrics().await;
        if metrics.risk_level == RiskLevel::High {
            warn!(
                score = metrics.risk_score,
                net_pnl = metrics.daily_stats.stats.net_pnl,
                active = metrics.position_summary.active_positions,
                "High risk level detected"
            );
            self.notifier
                .send_notification(
                    "High risk level detected - review positions and consider reducing exposure",
                    NotificationKind::Warning,
                    serde_json::to_value(&metrics).unwrap_or_default(),
                )
                .await;
        }
        metrics
    }

    fn spawn_rollover(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let wait = until_next_local_midnight(Utc::now());
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        if let Some(previous) = this.accountant.rollover(Utc::now()).await {
                            info!(date = %previous.date, net_pnl = previous.net_pnl, "Daily stats rolled over");
                        }
                    }
                }
            }
        })
    }

    /// Stop ingestion, drain in-flight work, then close out
    pub async fn shutdown(&self, tasks: SniperTasks, reason: &str) {
        warn!(reason, "Shutting down sniper");
        self.ingestor.stop();
        self.cancel.cancel();

        // A buy in flight finishes before positions are closed
        join_task("consumer", tasks.consumer).await;
        join_task("monitor", tasks.monitor).await;
        join_task("risk_monitor", tasks.risk_monitor).await;
        join_task("rollover", tasks.rollover).await;
        tasks.ingestor.abort();

        if self.config.monitor.close_on_shutdown && self.store.count() > 0 {
            info!(positions = self.store.count(), "Closing all positions before exit");
            self.monitor.close_all(ExitReason::Shutdown).await;
        }

        let final_stats = self.get_daily_stats().await;
        self.notifier
            .notify_bot_status(
                "Shutdown",
                json!({
                    "reason": reason,
                    "finalStats": final_stats,
                    "openPositions": self.store.count(),
                }),
            )
            .await;
    }

    pub fn get_active_positions(&self) -> Vec<Position> {
        self.store.all()
    }

    pub fn get_position_summary(&self) -> PositionSummary {
        self.store.summary()
    }

    pub async fn get_daily_stats(&self) -> DailyReport {
        self.accountant.daily_report(Utc::now()).await
    }

    pub async fn get_risk_metrics(&self) -> RiskMetrics {
        self.accountant
            .risk_metrics(self.store.summary(), Utc::now())
            .await
    }

    /// Flag every position for teardown by the monitor's next sweep
    pub async fn emergency_close_all(&self, reason: &str) -> Vec<EmergencyMark> {
        warn!(reason, "Emergency closing all positions");
        let marks: Vec<EmergencyMark> = self
            .store
            .mark_all_closing(reason)
            .into_iter()
            .map(|mint| EmergencyMark {
                mint,
                status: "marked_for_closure",
                reason: reason.to_string(),
            })
            .collect();

        self.notifier
            .send_notification(
                &format!("Emergency closure initiated for {} positions", marks.len()),
                NotificationKind::Warning,
                json!({ "reason": reason, "positions": marks }),
            )
            .await;
        marks
    }

    pub fn ingestor_stats(&self) -> IngestorSnapshot {
        self.ingestor.stats()
    }

    pub fn wallet(&self) -> solana_sdk::pubkey::Pubkey {
        self.engine.wallet()
    }
}

/// Await a background task; a panic or abort is logged, not propagated
async fn join_task(name: &str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            error!(task = name, error = %e, "Task ended abnormally");
            false
        }
    }
}

/// Time until the next local-calendar midnight
fn until_next_local_midnight(now: DateTime<Utc>) -> Duration {
    let fallback = Duration::from_secs(24 * 60 * 60);
    let local = now.with_timezone(&Local);
    let Some(next_midnight) = local
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    else {
        return fallback;
    };

    (next_midnight.with_timezone(&Utc) - now)
        .to_std()
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmissionRoute;
    use crate::detector::{PoolContext, PoolStatus};
    use crate::notify::testing::RecordingNotifier;
    use crate::stream::EnvelopeStream;
    use crate::trading::engine::testing::{MockChain, MockRouter, ScriptedSubmitter};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use solana_sdk::signature::Signer;

    struct IdleSource;

    #[async_trait]
    impl TransactionSource for IdleSource {
        async fn subscribe(&self, _request: &SubscribeRequest) -> Result<EnvelopeStream> {
            Ok(stream::pending().boxed())
        }
    }

    struct Harness {
        sniper: Arc<Sniper>,
        chain: Arc<MockChain>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(config: Config, submitter: ScriptedSubmitter) -> Harness {
        let keypair = Arc::new(Keypair::new());
        // 1 lamport buys 10 raw token units
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 10.0));
        let chain = Arc::new(MockChain::with_sol(5_000_000_000));
        let notifier = Arc::new(RecordingNotifier::default());

        let sniper = Sniper::new(
            config,
            SniperParts {
                source: Arc::new(IdleSource),
                router,
                chain: chain.clone(),
                submitter: Arc::new(submitter),
                keypair,
                notifier: notifier.clone(),
            },
        )
        .unwrap();

        Harness {
            sniper: Arc::new(sniper),
            chain,
            notifier,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.execution.route = SubmissionRoute::Standard;
        config.execution.retry_delay_ms = 1;
        config.risk.trade_cooldown_ms = 0;
        config
    }

    fn candidate(mint: &str) -> LaunchCandidate {
        LaunchCandidate {
            signature: format!("launch-{}", mint),
            mint: mint.to_string(),
            owner: "Owner".to_string(),
            pool_status: PoolStatus::RaydiumLaunchLab,
            sol_delta: 0.5,
            token_delta: 1_000_000.0,
            context: PoolContext {
                signature: format!("launch-{}", mint),
                slot: 7,
                pool_authority: crate::config::DEFAULT_POOL_AUTHORITY.to_string(),
                sol_reserve: 5.5,
                token_reserve: 1_000_000.0,
                token_decimals: Some(6),
            },
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_buy_registers_position_and_trade() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        h.chain.set_tokens("MintA", 900_000_000);

        let position = h.sniper.handle_candidate(candidate("MintA")).await.unwrap();
        assert_eq!(position.token_amount, 900_000_000);
        assert!((position.entry_value - 0.1).abs() < 1e-12);
        assert_eq!(position.pnl_ratio, 1.0);

        assert_eq!(h.sniper.get_active_positions().len(), 1);
        assert_eq!(h.sniper.get_position_summary().active_positions, 1);
        assert_eq!(h.notifier.count_kind(NotificationKind::Trade), 1);
        assert!(h
            .notifier
            .messages()
            .contains(&"Position opened: MintA".to_string()));

        // Buys are not closed trades
        assert_eq!(h.sniper.get_daily_stats().await.stats.total_trades, 0);
    }

    #[tokio::test]
    async fn test_second_buy_on_same_mint_is_blocked() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        h.sniper.handle_candidate(candidate("MintA")).await.unwrap();

        let err = h.sniper.handle_candidate(candidate("MintA")).await.unwrap_err();
        assert!(err.is_risk_block());
        assert!(err.to_string().contains("already has an active position"));
        assert_eq!(h.sniper.get_active_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_candidates_on_same_mint() {
        let h = harness(config(), ScriptedSubmitter::failing(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sniper = h.sniper.clone();
            handles.push(tokio::spawn(async move {
                sniper.handle_candidate(candidate("MintA")).await.is_ok()
            }));
        }

        let mut bought = 0;
        for handle in handles {
            if handle.await.unwrap() {
                bought += 1;
            }
        }
        assert_eq!(bought, 1);
        assert_eq!(h.sniper.get_active_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_low_balance_skips_buy() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        *h.chain.sol.lock().unwrap() = 50_000_000;

        let err = h.sniper.handle_candidate(candidate("MintA")).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert!(h.sniper.get_active_positions().is_empty());
        assert_eq!(h.notifier.count_kind(NotificationKind::Error), 1);
        assert!(h.sniper.preflight().await.is_err());
    }

    #[tokio::test]
    async fn test_balance_read_failure_notifies() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        *h.chain.sol_unreadable.lock().unwrap() = true;

        let err = h.sniper.handle_candidate(candidate("MintA")).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(_)));
        assert!(h.sniper.get_active_positions().is_empty());
        assert_eq!(h.notifier.count_kind(NotificationKind::Error), 1);
    }

    #[tokio::test]
    async fn test_failed_buy_notifies_and_leaves_no_position() {
        let h = harness(config(), ScriptedSubmitter::always_failing());

        let err = h.sniper.handle_candidate(candidate("MintA")).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert!(h.sniper.get_active_positions().is_empty());
        assert_eq!(h.notifier.count_kind(NotificationKind::Error), 1);
    }

    #[tokio::test]
    async fn test_emergency_close_marks_positions() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        h.sniper.handle_candidate(candidate("MintA")).await.unwrap();

        let marks = h.sniper.emergency_close_all("dashboard_request").await;
        assert_eq!(
            marks,
            vec![EmergencyMark {
                mint: "MintA".into(),
                status: "marked_for_closure",
                reason: "dashboard_request".into(),
            }]
        );
        // Teardown is asynchronous: the entry is still present
        assert_eq!(h.sniper.get_active_positions().len(), 1);
        assert!(h
            .notifier
            .messages()
            .contains(&"Emergency closure initiated for 1 positions".to_string()));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_closes_positions() {
        let h = harness(config(), ScriptedSubmitter::failing(0));
        h.chain.set_tokens("MintA", 1_000);
        h.sniper.handle_candidate(candidate("MintA")).await.unwrap();

        let tasks = h.sniper.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.sniper.shutdown(tasks, "test").await;

        assert!(h.sniper.get_active_positions().is_empty());
        assert!(h
            .notifier
            .messages()
            .contains(&"Bot Status: Shutdown".to_string()));
    }

    #[tokio::test]
    async fn test_risk_metrics_reflect_positions() {
        let mut cfg = config();
        cfg.trading.max_positions = 1;
        let h = harness(cfg, ScriptedSubmitter::failing(0));
        h.sniper.handle_candidate(candidate("MintA")).await.unwrap();

        let metrics = h.sniper.check_risk().await;
        // Full position book and zero win rate
        assert_eq!(metrics.risk_score, 45);
        assert_eq!(metrics.risk_level, RiskLevel::Medium);
        assert!(metrics
            .recommendations
            .iter()
            .any(|r| r.contains("maximum position limit")));
    }

    #[test]
    fn test_midnight_wait_is_within_a_day() {
        let wait = until_next_local_midnight(Utc::now());
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(25 * 60 * 60));
    }

    #[tokio::test]
    async fn test_join_task_reports_panicked_task() {
        let ok = tokio::spawn(async {});
        assert!(join_task("rollover", ok).await);

        let panicked = tokio::spawn(async { panic!("consumer crashed") });
        assert!(!join_task("consumer", panicked).await);
    }
}
