//! Execution engine
//!
//! One swap = quote → swap transaction → (tip append) → sign → submit → confirm.
//! The whole sequence is retried a fixed number of times with a constant delay.
//! From the third attempt onward a sell re-reads the live token balance: an
//! empty balance ends execution with [`ExecutionOutcome::NothingToSell`], a
//! smaller balance clamps the amount.

use backoff::backoff::{Backoff, Constant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::chain::ChainClient;
use super::router::{PrioritizationFee, QuoteRequest, SwapRequest, SwapRouter};
use super::submit::Submitter;
use super::tip::{append_tip_transfer, decode_transaction, sign_message};
use super::{TradeIntent, TradeSide};
use crate::config::{Config, SubmissionRoute};
use crate::error::{Error, Result};

/// Attempt index (1-based) from which a sell re-reads its balance
const SELL_RECHECK_FROM_ATTEMPT: u32 = 3;

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub route: SubmissionRoute,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub slippage_bps: u32,
    pub priority_fee_lamports: u64,
    pub relay_tip_lamports: u64,
    pub bundle_tip_lamports: u64,
    pub tip_address: Pubkey,
    pub native_mint: String,
}

impl ExecutionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let exec = &config.execution;
        let tip_address = Pubkey::from_str(&exec.tip_address)
            .map_err(|e| Error::ConfigValidation(format!("tip_address: {}", e)))?;

        Ok(Self {
            route: exec.route,
            max_retries: exec.max_retries.max(1),
            retry_delay: Duration::from_millis(exec.retry_delay_ms),
            slippage_bps: config.trading.slippage_bps,
            priority_fee_lamports: exec.priority_fee_lamports,
            relay_tip_lamports: exec.relay_tip_lamports,
            bundle_tip_lamports: exec.bundle_tip_lamports,
            tip_address,
            native_mint: config.detector.wrapped_native_mint.clone(),
        })
    }

    /// Fee parameter sent to the routing service for the configured route
    pub fn prioritization_fee(&self) -> Option<PrioritizationFee> {
        match self.route {
            SubmissionRoute::Standard => Some(PrioritizationFee::Lamports(self.priority_fee_lamports)),
            SubmissionRoute::BundleTip => Some(PrioritizationFee::JitoTip {
                jito_tip_lamports: self.bundle_tip_lamports,
            }),
            SubmissionRoute::TipRelay => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Confirmed { signature: String },
    Failed { error: String },
    NothingToSell,
}

/// One logged execution attempt
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub side: TradeSide,
    pub mint: String,
    pub route: String,
    pub amount: u64,
    pub started_at: DateTime<Utc>,
    /// Submission to confirmation, when a transaction was submitted
    pub confirm_ms: Option<u64>,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Confirmed {
        signature: String,
        /// Input amount actually swapped (after any clamp)
        amount_in: u64,
        /// Quoted output in base units
        quoted_out: u64,
    },
    /// Sell found no tokens left to sell
    NothingToSell,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl ExecutionReport {
    pub fn signature(&self) -> Option<&str> {
        match &self.outcome {
            ExecutionOutcome::Confirmed { signature, .. } => Some(signature),
            ExecutionOutcome::NothingToSell => None,
        }
    }
}

struct Confirmed {
    signature: String,
    quoted_out: u64,
    confirm_ms: u64,
}

struct AttemptFailure {
    error: Error,
    confirm_ms: Option<u64>,
}

impl From<Error> for AttemptFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            confirm_ms: None,
        }
    }
}

pub struct ExecutionEngine {
    router: Arc<dyn SwapRouter>,
    chain: Arc<dyn ChainClient>,
    submitter: Arc<dyn Submitter>,
    keypair: Arc<Keypair>,
    settings: ExecutionSettings,
}

impl ExecutionEngine {
    pub fn new(
        router: Arc<dyn SwapRouter>,
        chain: Arc<dyn ChainClient>,
        submitter: Arc<dyn Submitter>,
        keypair: Arc<Keypair>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            router,
            chain,
            submitter,
            keypair,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn wallet(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub fn router(&self) -> &Arc<dyn SwapRouter> {
        &self.router
    }

    /// Execute a swap with retries
    pub async fn execute(&self, intent: &TradeIntent) -> Result<ExecutionReport> {
        let max_attempts = self.settings.max_retries.max(1);
        let mut delay = Constant::new(self.settings.retry_delay);
        let mut attempts = Vec::with_capacity(max_attempts as usize);
        let mut amount = intent.amount;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let started_at = Utc::now();

            if intent.side == TradeSide::Sell && attempt >= SELL_RECHECK_FROM_ATTEMPT {
                match self.chain.token_balance(&self.wallet(), &intent.mint).await {
                    Ok(balance) => {
                        let available = balance.map(|b| b.amount).unwrap_or(0);
                        if available == 0 {
                            info!(mint = %intent.mint, attempt, "No tokens left to sell");
                            attempts.push(self.record(
                                attempt,
                                intent,
                                amount,
                                started_at,
                                None,
                                AttemptStatus::NothingToSell,
                            ));
                            return Ok(ExecutionReport {
                                outcome: ExecutionOutcome::NothingToSell,
                                attempts,
                            });
                        }
                        if amount > available {
                            warn!(
                                mint = %intent.mint,
                                requested = amount,
                                available,
                                "Clamping sell amount to live balance"
                            );
                            amount = available;
                        }
                    }
                    Err(e) => {
                        warn!(mint = %intent.mint, attempt, error = %e, "Balance re-check failed");
                        attempts.push(self.record(
                            attempt,
                            intent,
                            amount,
                            started_at,
                            None,
                            AttemptStatus::Failed { error: e.to_string() },
                        ));
                        last_error = Some(e);
                        self.pause(attempt, max_attempts, &mut delay).await;
                        continue;
                    }
                }
            }

            match self.attempt(intent, amount).await {
                Ok(confirmed) => {
                    info!(
                        side = %intent.side,
                        mint = %intent.mint,
                        attempt,
                        signature = %confirmed.signature,
                        confirm_ms = confirmed.confirm_ms,
                        "Swap confirmed"
                    );
                    attempts.push(self.record(
                        attempt,
                        intent,
                        amount,
                        started_at,
                        Some(confirmed.confirm_ms),
                        AttemptStatus::Confirmed {
                            signature: confirmed.signature.clone(),
                        },
                    ));
                    return Ok(ExecutionReport {
                        outcome: ExecutionOutcome::Confirmed {
                            signature: confirmed.signature,
                            amount_in: amount,
                            quoted_out: confirmed.quoted_out,
                        },
                        attempts,
                    });
                }
                Err(failure) => {
                    warn!(
                        side = %intent.side,
                        mint = %intent.mint,
                        attempt,
                        max_attempts,
                        retryable = failure.error.is_retryable(),
                        error = %failure.error,
                        "Swap attempt failed"
                    );
                    attempts.push(self.record(
                        attempt,
                        intent,
                        amount,
                        started_at,
                        failure.confirm_ms,
                        AttemptStatus::Failed {
                            error: failure.error.to_string(),
                        },
                    ));
                    last_error = Some(failure.error);
                    self.pause(attempt, max_attempts, &mut delay).await;
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| Error::Internal("no attempt was made".into())),
            ),
        })
    }

    async fn pause(&self, attempt: u32, max_attempts: u32, delay: &mut Constant) {
        if attempt < max_attempts {
            let wait = delay.next_backoff().unwrap_or(self.settings.retry_delay);
            tokio::time::sleep(wait).await;
        }
    }

    fn record(
        &self,
        attempt: u32,
        intent: &TradeIntent,
        amount: u64,
        started_at: DateTime<Utc>,
        confirm_ms: Option<u64>,
        status: AttemptStatus,
    ) -> AttemptRecord {
        AttemptRecord {
            attempt,
            side: intent.side,
            mint: intent.mint.clone(),
            route: self.settings.route.to_string(),
            amount,
            started_at,
            confirm_ms,
            status,
        }
    }

    async fn attempt(
        &self,
        intent: &TradeIntent,
        amount: u64,
    ) -> std::result::Result<Confirmed, AttemptFailure> {
        let (input_mint, output_mint) = match intent.side {
            TradeSide::Buy => (self.settings.native_mint.clone(), intent.mint.clone()),
            TradeSide::Sell => (intent.mint.clone(), self.settings.native_mint.clone()),
        };

        let quote = self
            .router
            .quote(&QuoteRequest {
                input_mint,
                output_mint,
                amount,
                slippage_bps: self.settings.slippage_bps,
            })
            .await?;

        let request = SwapRequest::new(self.wallet().to_string(), &quote)
            .with_fee(self.settings.prioritization_fee());
        let swap = self.router.swap_transaction(&request).await?;

        let transaction = decode_transaction(&swap.swap_transaction)?;
        let mut message = transaction.message;

        if self.settings.route == SubmissionRoute::TipRelay {
            let blockhash = self.chain.latest_blockhash().await?;
            append_tip_transfer(
                &mut message,
                &self.wallet(),
                &self.settings.tip_address,
                self.settings.relay_tip_lamports,
                blockhash,
            )?;
        }

        let signed = sign_message(message, &self.keypair)?;

        let submitted = Instant::now();
        let result = self.submitter.submit(&signed).await;
        let confirm_ms = submitted.elapsed().as_millis() as u64;

        match result {
            Ok(signature) => Ok(Confirmed {
                signature: signature.to_string(),
                quoted_out: quote.out_amount,
                confirm_ms,
            }),
            Err(error) => Err(AttemptFailure {
                error,
                confirm_ms: Some(confirm_ms),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use solana_sdk::message::VersionedMessage;

    fn engine(
        keypair: Arc<Keypair>,
        router: Arc<MockRouter>,
        chain: Arc<MockChain>,
        submitter: Arc<ScriptedSubmitter>,
        route: SubmissionRoute,
    ) -> ExecutionEngine {
        ExecutionEngine::new(router, chain, submitter, keypair, settings(route))
    }

    #[tokio::test]
    async fn test_fail_fail_success_logs_three_attempts() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 1000.0));
        let chain = Arc::new(MockChain::default());
        let submitter = Arc::new(ScriptedSubmitter::failing(2));
        let engine = engine(keypair, router, chain, submitter.clone(), SubmissionRoute::Standard);

        let report = engine
            .execute(&TradeIntent::buy("MintA", 100_000_000, None))
            .await
            .unwrap();

        assert_eq!(report.attempts.len(), 3);
        assert!(matches!(report.attempts[0].status, AttemptStatus::Failed { .. }));
        assert!(matches!(report.attempts[1].status, AttemptStatus::Failed { .. }));
        assert!(matches!(report.attempts[2].status, AttemptStatus::Confirmed { .. }));
        assert!(report.attempts.iter().all(|a| a.confirm_ms.is_some()));
        assert_eq!(submitter.submissions(), 3);

        match report.outcome {
            ExecutionOutcome::Confirmed {
                amount_in,
                quoted_out,
                ..
            } => {
                assert_eq!(amount_in, 100_000_000);
                assert_eq!(quoted_out, 100_000_000_000);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 1.0));
        let chain = Arc::new(MockChain::default());
        let submitter = Arc::new(ScriptedSubmitter::always_failing());
        let engine = engine(keypair, router, chain, submitter.clone(), SubmissionRoute::Standard);

        let err = engine
            .execute(&TradeIntent::buy("MintA", 1_000, None))
            .await
            .unwrap_err();

        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::TransactionSend(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(submitter.submissions(), 3);
    }

    #[tokio::test]
    async fn test_sell_clamps_to_live_balance_on_third_attempt() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 0.5));
        let chain = Arc::new(MockChain::default());
        chain.set_tokens("MintA", 40);
        let submitter = Arc::new(ScriptedSubmitter::failing(2));
        let engine = engine(keypair, router.clone(), chain.clone(), submitter, SubmissionRoute::Standard);

        let report = engine
            .execute(&TradeIntent::sell("MintA", 100, None))
            .await
            .unwrap();

        assert_eq!(router.quoted_amounts(), vec![100, 100, 40]);
        assert_eq!(*chain.balance_reads.lock().unwrap(), 1);
        assert_eq!(report.attempts[2].amount, 40);
        assert!(matches!(
            report.outcome,
            ExecutionOutcome::Confirmed { amount_in: 40, .. }
        ));
    }

    #[tokio::test]
    async fn test_sell_with_zero_balance_is_nothing_to_sell() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 0.5));
        let chain = Arc::new(MockChain::default());
        let submitter = Arc::new(ScriptedSubmitter::always_failing());
        let engine = engine(keypair, router, chain, submitter.clone(), SubmissionRoute::Standard);

        let report = engine
            .execute(&TradeIntent::sell("MintA", 100, None))
            .await
            .unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::NothingToSell);
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[2].status, AttemptStatus::NothingToSell);
        assert_eq!(submitter.submissions(), 2);
        assert!(report.signature().is_none());
    }

    #[tokio::test]
    async fn test_buy_never_rechecks_balance() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 1.0));
        let chain = Arc::new(MockChain::default());
        let submitter = Arc::new(ScriptedSubmitter::failing(2));
        let engine = engine(keypair, router, chain.clone(), submitter, SubmissionRoute::Standard);

        engine
            .execute(&TradeIntent::buy("MintA", 1_000, None))
            .await
            .unwrap();
        assert_eq!(*chain.balance_reads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relay_route_appends_tip_and_signs() {
        let keypair = Arc::new(Keypair::new());
        let router = Arc::new(MockRouter::new(keypair.pubkey(), 1.0));
        let chain = Arc::new(MockChain::default());
        let submitter = Arc::new(ScriptedSubmitter::failing(0));
        let engine = engine(
            keypair.clone(),
            router,
            chain,
            submitter.clone(),
            SubmissionRoute::TipRelay,
        );
        let tip = engine.settings().tip_address;

        engine
            .execute(&TradeIntent::buy("MintA", 1_000, None))
            .await
            .unwrap();

        let sent = submitter.submitted.lock().unwrap()[0].clone();
        assert!(sent.verify_with_results().iter().all(|ok| *ok));
        let VersionedMessage::Legacy(message) = &sent.message else {
            panic!("expected legacy message");
        };
        assert_eq!(message.instructions.len(), 2);
        assert!(message.account_keys.contains(&tip));
    }

    #[test]
    fn test_route_fee_parameters() {
        assert_eq!(
            settings(SubmissionRoute::Standard).prioritization_fee(),
            Some(PrioritizationFee::Lamports(10_000))
        );
        assert_eq!(
            settings(SubmissionRoute::BundleTip).prioritization_fee(),
            Some(PrioritizationFee::JitoTip {
                jito_tip_lamports: 100_000
            })
        );
        assert_eq!(settings(SubmissionRoute::TipRelay).prioritization_fee(), None);
    }
}
