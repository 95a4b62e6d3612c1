//! Transaction submission
//!
//! Every submitter returns only once the signature is confirmed (or the dry-run
//! signature is produced); failures surface as retryable errors.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{Error, Result};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(400);

#[async_trait]
pub trait Submitter: Send + Sync {
    /// Broadcast a signed transaction and wait for confirmation
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature>;

    fn name(&self) -> &'static str;
}

fn first_signature(transaction: &VersionedTransaction) -> Result<Signature> {
    transaction
        .signatures
        .first()
        .copied()
        .ok_or_else(|| Error::TransactionBuild("transaction has no signatures".into()))
}

/// Poll the signature status until it lands, fails, or `timeout` passes
async fn wait_for_confirmation(
    rpc: &RpcClient,
    signature: &Signature,
    timeout: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        match rpc
            .get_signature_status_with_commitment(signature, CommitmentConfig::confirmed())
            .await
        {
            Ok(Some(Ok(()))) => return Ok(()),
            Ok(Some(Err(e))) => {
                return Err(Error::TransactionSend(format!(
                    "transaction {} failed: {}",
                    signature, e
                )))
            }
            Ok(None) => {}
            Err(e) => debug!(%signature, error = %e, "Signature status poll failed"),
        }

        if started.elapsed() >= timeout {
            return Err(Error::ConfirmationTimeout(timeout.as_millis() as u64));
        }
        tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
    }
}

/// Sends through the main RPC endpoint with preflight skipped
pub struct RpcSubmitter {
    rpc: Arc<RpcClient>,
    confirm_timeout: Duration,
}

impl RpcSubmitter {
    pub fn new(rpc: Arc<RpcClient>, confirm_timeout: Duration) -> Self {
        Self {
            rpc,
            confirm_timeout,
        }
    }
}

#[async_trait]
impl Submitter for RpcSubmitter {
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(1),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .rpc
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;
        debug!(%signature, "Sent via RPC, awaiting confirmation");

        wait_for_confirmation(&self.rpc, &signature, self.confirm_timeout).await?;
        Ok(signature)
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}

/// Sends through the tip relay; confirmation is read from the main RPC
pub struct RelaySubmitter {
    relay: RpcClient,
    rpc: Arc<RpcClient>,
    confirm_timeout: Duration,
}

impl RelaySubmitter {
    pub fn new(relay_url: &str, api_key: &str, rpc: Arc<RpcClient>, confirm_timeout: Duration) -> Self {
        let endpoint = if api_key.is_empty() {
            relay_url.to_string()
        } else {
            format!("{}?c={}", relay_url, api_key)
        };
        Self {
            relay: RpcClient::new(endpoint),
            rpc,
            confirm_timeout,
        }
    }
}

#[async_trait]
impl Submitter for RelaySubmitter {
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            max_retries: Some(2),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .relay
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| Error::TransactionSend(format!("relay: {}", e)))?;
        debug!(%signature, "Sent via relay, awaiting confirmation");

        wait_for_confirmation(&self.rpc, &signature, self.confirm_timeout).await?;
        Ok(signature)
    }

    fn name(&self) -> &'static str {
        "relay"
    }
}

/// Never broadcasts; reports the locally computed signature
#[derive(Debug, Default)]
pub struct DryRunSubmitter;

#[async_trait]
impl Submitter for DryRunSubmitter {
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let signature = first_signature(transaction)?;
        info!(%signature, "[DRY RUN] Would submit transaction");
        Ok(signature)
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}
