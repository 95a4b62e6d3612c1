//! CLI command implementations

use anyhow::Result;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{Config, SubmissionRoute};
use crate::notify::{LogNotifier, Notifier};
use crate::sniper::{Sniper, SniperParts};
use crate::stream::{SubscribeRequest, TransactionSource, WebSocketSource};
use crate::trading::{
    lamports_to_sol, ChainClient, DryRunSubmitter, JupiterRouter, QuoteRequest, RelaySubmitter,
    RpcChainClient, RpcSubmitter, Submitter, SwapRouter,
};
use crate::wallet;

/// Quote target used by the health check
const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// How often the running bot logs a status line
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

fn rpc_client(config: &Config) -> Arc<RpcClient> {
    Arc::new(RpcClient::new_with_timeout_and_commitment(
        config.rpc.endpoint.clone(),
        Duration::from_millis(config.rpc.timeout_ms),
        CommitmentConfig::confirmed(),
    ))
}

fn submitter(config: &Config, rpc: Arc<RpcClient>, dry_run: bool) -> Arc<dyn Submitter> {
    let confirm_timeout = Duration::from_millis(config.rpc.confirm_timeout_ms);
    if dry_run {
        return Arc::new(DryRunSubmitter);
    }
    match config.execution.route {
        SubmissionRoute::TipRelay => Arc::new(RelaySubmitter::new(
            &config.execution.relay_url,
            &config.execution.relay_api_key,
            rpc,
            confirm_timeout,
        )),
        SubmissionRoute::Standard | SubmissionRoute::BundleTip => {
            Arc::new(RpcSubmitter::new(rpc, confirm_timeout))
        }
    }
}

/// Start the sniper bot
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    let dry_run = dry_run || config.execution.dry_run;
    if dry_run {
        warn!("Running in DRY-RUN mode - no real trades will be executed");
    }

    info!("Starting launch sniper...");
    info!(
        "Buy amount: {} SOL, Slippage: {}bps, Route: {}",
        config.trading.sniper_amount_sol, config.trading.slippage_bps, config.execution.route
    );

    let keypair = Arc::new(wallet::load_keypair()?);
    info!("Loaded keypair: {}", keypair.pubkey());

    let rpc = rpc_client(config);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let parts = SniperParts {
        source: Arc::new(WebSocketSource::new(&config.stream)),
        router: Arc::new(JupiterRouter::new(&config.execution)?),
        chain: Arc::new(RpcChainClient::new(rpc.clone())),
        submitter: submitter(config, rpc, dry_run),
        keypair,
        notifier: notifier.clone(),
    };

    let sniper = Arc::new(Sniper::new(config.clone(), parts)?);

    let lamports = sniper.preflight().await?;
    info!("Wallet balance: {:.4} SOL", lamports_to_sol(lamports));

    let tasks = sniper.start();
    notifier
        .notify_bot_status(
            "Started",
            serde_json::json!({
                "wallet": sniper.wallet().to_string(),
                "dryRun": dry_run,
                "route": config.execution.route.to_string(),
                "sniperAmountSol": config.trading.sniper_amount_sol,
            }),
        )
        .await;

    let mut status_tick = tokio::time::interval(STATUS_LOG_INTERVAL);
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    status_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = status_tick.tick() => {
                let stream = sniper.ingestor_stats();
                let summary = sniper.get_position_summary();
                let daily = sniper.get_daily_stats().await;
                info!(
                    received = stream.received,
                    candidates = stream.candidates,
                    reconnects = stream.reconnects,
                    positions = summary.active_positions,
                    open_pnl = summary.total_pnl,
                    trades = daily.stats.total_trades,
                    net_pnl = daily.stats.net_pnl,
                    "Status"
                );
            }
        }
    }

    sniper.shutdown(tasks, "signal").await;
    info!("Sniper stopped");
    Ok(())
}

/// Show wallet balance and configured limits
pub async fn status(config: &Config) -> Result<()> {
    let keypair = wallet::load_keypair()?;
    let chain = RpcChainClient::new(rpc_client(config));
    let lamports = chain.sol_balance(&keypair.pubkey()).await?;

    println!("\n=== SNIPER STATUS ===\n");
    println!("Wallet: {}", keypair.pubkey());
    println!("Balance: {:.4} SOL", lamports_to_sol(lamports));
    println!(
        "Minimum balance: {} SOL ({})",
        config.trading.min_wallet_balance_sol,
        if lamports_to_sol(lamports) >= config.trading.min_wallet_balance_sol {
            "OK"
        } else {
            "LOW"
        }
    );

    println!("\nLimits:");
    println!("  Buy amount: {} SOL", config.trading.sniper_amount_sol);
    println!("  Max positions: {}", config.trading.max_positions);
    println!("  Max daily loss: {} SOL", config.risk.max_daily_loss);
    println!("  Max single loss: {} SOL", config.risk.max_single_loss);
    println!(
        "  Exits: take profit {}x, stop loss {}x, max hold {}s",
        config.trading.profit_target,
        config.trading.stop_loss,
        config.trading.max_hold_time_ms / 1000
    );

    println!("\nPositions are held in memory by the running bot; none are persisted.");
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check system health
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    match check_rpc(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Transaction stream... ");
    match check_stream(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Quote API... ");
    match check_quote(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    match config.execution.route {
        SubmissionRoute::TipRelay => println!(
            "Tip relay... {} (tip {} lamports)",
            config.execution.relay_url, config.execution.relay_tip_lamports
        ),
        SubmissionRoute::BundleTip => println!(
            "Bundle tip... {} lamports via quote API",
            config.execution.bundle_tip_lamports
        ),
        SubmissionRoute::Standard => println!(
            "Standard RPC... priority fee {} lamports",
            config.execution.priority_fee_lamports
        ),
    }

    print!("Keypair... ");
    match check_keypair(config).await {
        Ok(balance) => println!("OK (balance: {:.4} SOL)", balance),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_rpc(config: &Config) -> Result<u64> {
    let client = rpc_client(config);

    let start = Instant::now();
    client.get_slot().await?;
    Ok(start.elapsed().as_millis() as u64)
}

async fn check_stream(config: &Config) -> Result<u64> {
    let source = WebSocketSource::new(&config.stream);
    let request = SubscribeRequest::from_config(&config.stream);
    let timeout = Duration::from_secs(5);

    let start = Instant::now();
    match tokio::time::timeout(timeout, source.subscribe(&request)).await {
        // Dropping the stream closes the subscription
        Ok(Ok(_stream)) => Ok(start.elapsed().as_millis() as u64),
        Ok(Err(e)) => Err(anyhow::anyhow!("{}", e)),
        Err(_) => Err(anyhow::anyhow!(
            "Connection timed out after {}s",
            timeout.as_secs()
        )),
    }
}

async fn check_quote(config: &Config) -> Result<u64> {
    let router = JupiterRouter::new(&config.execution)?;
    let request = QuoteRequest {
        input_mint: config.detector.wrapped_native_mint.clone(),
        output_mint: USDC_MINT.to_string(),
        amount: 10_000_000,
        slippage_bps: config.trading.slippage_bps,
    };

    let start = Instant::now();
    let quote = router.quote(&request).await?;
    if quote.out_amount == 0 {
        return Err(anyhow::anyhow!("Quote API returned an empty route"));
    }
    Ok(start.elapsed().as_millis() as u64)
}

async fn check_keypair(config: &Config) -> Result<f64> {
    let keypair: Keypair = wallet::load_keypair()?;
    let chain = RpcChainClient::new(rpc_client(config));
    let lamports = chain.sol_balance(&keypair.pubkey()).await?;
    Ok(lamports_to_sol(lamports))
}
