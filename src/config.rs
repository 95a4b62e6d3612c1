//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;

use crate::detector::PoolStatus;

/// Raydium launchpad pool authority; its WSOL balance moves when liquidity lands
pub const DEFAULT_POOL_AUTHORITY: &str = "WLHv2UAZm6z4KyaaELi5pjdbJh6RESMva1Rnn8pJVVh";

/// Wrapped SOL mint
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Tip address used by the relay route
pub const DEFAULT_RELAY_TIP_ADDRESS: &str = "TEMPaMeCRFAS9EKF53Jd6KpHxgL47uWLcpFArU1Fanq";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on waiting for a submitted transaction to confirm
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// WebSocket endpoint that serves `transactionSubscribe`
    #[serde(default = "default_stream_ws_url")]
    pub ws_url: String,
    /// Accounts the server-side filter must see in each transaction
    #[serde(default = "default_account_include")]
    pub account_include: Vec<String>,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: default_stream_ws_url(),
            account_include: default_account_include(),
            commitment: default_commitment(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Minimum pool-authority SOL increase; strictly greater qualifies
    #[serde(default = "default_liquidity_threshold")]
    pub liquidity_threshold: f64,
    #[serde(default = "default_mint_marker")]
    pub mint_marker: String,
    #[serde(default = "default_pool_authority")]
    pub pool_authority: String,
    #[serde(default = "default_wsol_mint")]
    pub wrapped_native_mint: String,
    #[serde(default)]
    pub pools: PoolToggles,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            liquidity_threshold: default_liquidity_threshold(),
            mint_marker: default_mint_marker(),
            pool_authority: default_pool_authority(),
            wrapped_native_mint: default_wsol_mint(),
            pools: PoolToggles::default(),
        }
    }
}

/// Which pool kinds produce candidates
#[derive(Debug, Clone, Deserialize)]
pub struct PoolToggles {
    #[serde(default = "default_true")]
    pub pumpfun: bool,
    #[serde(default = "default_true")]
    pub pumpswap: bool,
    #[serde(default = "default_true")]
    pub raydium_launchlab: bool,
    #[serde(default = "default_true")]
    pub raydium_cpmm: bool,
}

impl Default for PoolToggles {
    fn default() -> Self {
        Self {
            pumpfun: true,
            pumpswap: true,
            raydium_launchlab: true,
            raydium_cpmm: true,
        }
    }
}

impl PoolToggles {
    pub fn is_enabled(&self, status: PoolStatus) -> bool {
        match status {
            PoolStatus::PumpFun => self.pumpfun,
            PoolStatus::PumpSwap => self.pumpswap,
            PoolStatus::RaydiumLaunchLab => self.raydium_launchlab,
            PoolStatus::RaydiumCpmm => self.raydium_cpmm,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// SOL committed per buy
    #[serde(default = "default_sniper_amount_sol")]
    pub sniper_amount_sol: f64,
    /// Exit when value / entry reaches this ratio
    #[serde(default = "default_profit_target")]
    pub profit_target: f64,
    /// Exit when value / entry falls to this ratio
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    #[serde(default = "default_max_hold_time_ms")]
    pub max_hold_time_ms: u64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    /// Startup refuses to run below this wallet balance
    #[serde(default = "default_min_wallet_balance_sol")]
    pub min_wallet_balance_sol: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            sniper_amount_sol: default_sniper_amount_sol(),
            profit_target: default_profit_target(),
            stop_loss: default_stop_loss(),
            max_hold_time_ms: default_max_hold_time_ms(),
            max_positions: default_max_positions(),
            slippage_bps: default_slippage_bps(),
            min_wallet_balance_sol: default_min_wallet_balance_sol(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_max_single_loss")]
    pub max_single_loss: f64,
    #[serde(default = "default_trade_cooldown_ms")]
    pub trade_cooldown_ms: u64,
    /// Fraction of the daily loss limit that triggers a warning
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
    #[serde(default = "default_risk_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_single_loss: default_max_single_loss(),
            trade_cooldown_ms: default_trade_cooldown_ms(),
            warning_ratio: default_warning_ratio(),
            monitor_interval_ms: default_risk_monitor_interval_ms(),
        }
    }
}

/// Transaction submission channel
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionRoute {
    /// Broadcast and confirm through the main RPC endpoint, flat priority fee
    #[serde(alias = "solana", alias = "0slot")]
    Standard,
    /// Explicit tip transfer appended, sent through the relay endpoint
    #[serde(alias = "nozomi")]
    TipRelay,
    /// Tip passed to the routing service as a parameter
    #[serde(alias = "jito", alias = "race")]
    BundleTip,
}

impl std::fmt::Display for SubmissionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionRoute::Standard => write!(f, "standard"),
            SubmissionRoute::TipRelay => write!(f, "tip_relay"),
            SubmissionRoute::BundleTip => write!(f, "bundle_tip"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_route")]
    pub route: SubmissionRoute,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Flat fee for the standard route
    #[serde(default = "default_priority_fee")]
    pub priority_fee_lamports: u64,
    /// Appended transfer amount for the relay route
    #[serde(default = "default_relay_tip")]
    pub relay_tip_lamports: u64,
    /// Routing-service tip for the bundle route
    #[serde(default = "default_bundle_tip")]
    pub bundle_tip_lamports: u64,
    #[serde(default = "default_relay_tip_address")]
    pub tip_address: String,
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default)]
    pub relay_api_key: String,
    #[serde(default = "default_quote_api_url")]
    pub quote_api_url: String,
    #[serde(default)]
    pub quote_api_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Build and sign but never broadcast
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            route: default_route(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            priority_fee_lamports: default_priority_fee(),
            relay_tip_lamports: default_relay_tip(),
            bundle_tip_lamports: default_bundle_tip(),
            tip_address: default_relay_tip_address(),
            relay_url: default_relay_url(),
            relay_api_key: String::new(),
            quote_api_url: default_quote_api_url(),
            quote_api_key: String::new(),
            http_timeout_secs: default_http_timeout_secs(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    /// Sell every open position on Ctrl-C
    #[serde(default = "default_true")]
    pub close_on_shutdown: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
            close_on_shutdown: true,
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_confirm_timeout_ms() -> u64 {
    60000
}

fn default_stream_ws_url() -> String {
    std::env::var("STREAM_WS_URL").unwrap_or_else(|_| "wss://atlas-mainnet.helius-rpc.com".into())
}

fn default_account_include() -> Vec<String> {
    vec![DEFAULT_POOL_AUTHORITY.to_string()]
}

fn default_commitment() -> String {
    "processed".into()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_liquidity_threshold() -> f64 {
    0.1
}

fn default_mint_marker() -> String {
    "instruction: mintto".into()
}

fn default_pool_authority() -> String {
    DEFAULT_POOL_AUTHORITY.into()
}

fn default_wsol_mint() -> String {
    WSOL_MINT.into()
}

fn default_sniper_amount_sol() -> f64 {
    0.1
}

fn default_profit_target() -> f64 {
    2.0
}

fn default_stop_loss() -> f64 {
    0.5
}

fn default_max_hold_time_ms() -> u64 {
    300_000
}

fn default_max_positions() -> usize {
    5
}

fn default_slippage_bps() -> u32 {
    5000
}

fn default_min_wallet_balance_sol() -> f64 {
    1.0
}

fn default_max_daily_loss() -> f64 {
    1.0
}

fn default_max_single_loss() -> f64 {
    0.5
}

fn default_trade_cooldown_ms() -> u64 {
    5000
}

fn default_warning_ratio() -> f64 {
    0.8
}

fn default_risk_monitor_interval_ms() -> u64 {
    10_000
}

fn default_route() -> SubmissionRoute {
    SubmissionRoute::Standard
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_priority_fee() -> u64 {
    10_000
}

fn default_relay_tip() -> u64 {
    200_000
}

fn default_bundle_tip() -> u64 {
    100_000
}

fn default_relay_tip_address() -> String {
    DEFAULT_RELAY_TIP_ADDRESS.into()
}

fn default_relay_url() -> String {
    "https://ams1.secure.nozomi.temporal.xyz".into()
}

fn default_quote_api_url() -> String {
    "https://api.jup.ag/swap/v1".into()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_monitor_interval_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if t.sniper_amount_sol <= 0.0 {
            anyhow::bail!("sniper_amount_sol must be positive");
        }
        if t.profit_target <= 1.0 {
            anyhow::bail!("profit_target must be greater than 1.0, got {}", t.profit_target);
        }
        if t.stop_loss <= 0.0 || t.stop_loss >= 1.0 {
            anyhow::bail!("stop_loss must be between 0 and 1, got {}", t.stop_loss);
        }
        if t.max_positions == 0 {
            anyhow::bail!("max_positions must be at least 1");
        }
        if t.max_hold_time_ms == 0 {
            anyhow::bail!("max_hold_time_ms must be positive");
        }
        if t.slippage_bps > 10000 {
            anyhow::bail!("slippage_bps cannot exceed 10000 (100%)");
        }

        let r = &self.risk;
        if r.max_daily_loss <= 0.0 {
            anyhow::bail!("max_daily_loss must be positive");
        }
        if r.max_single_loss <= 0.0 {
            anyhow::bail!("max_single_loss must be positive");
        }
        if r.warning_ratio <= 0.0 || r.warning_ratio > 1.0 {
            anyhow::bail!("warning_ratio must be in (0, 1]");
        }
        if t.sniper_amount_sol > r.max_single_loss {
            tracing::warn!(
                "sniper_amount_sol ({}) exceeds max_single_loss ({}) - every buy will be blocked",
                t.sniper_amount_sol,
                r.max_single_loss
            );
        }

        if self.execution.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.detector.liquidity_threshold < 0.0 {
            anyhow::bail!("liquidity_threshold cannot be negative");
        }
        if self.stream.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.stream.account_include.is_empty() {
            anyhow::bail!("stream.account_include must name at least one account");
        }
        if self.monitor.interval_ms == 0 || self.risk.monitor_interval_ms == 0 {
            anyhow::bail!("monitor intervals must be positive");
        }

        for (name, value) in [
            ("detector.pool_authority", &self.detector.pool_authority),
            ("detector.wrapped_native_mint", &self.detector.wrapped_native_mint),
            ("execution.tip_address", &self.execution.tip_address),
        ] {
            Pubkey::from_str(value).with_context(|| format!("Invalid {}: {}", name, value))?;
        }
        for account in &self.stream.account_include {
            Pubkey::from_str(account)
                .with_context(|| format!("Invalid stream.account_include entry: {}", account))?;
        }

        url::Url::parse(&self.stream.ws_url).context("Invalid stream.ws_url")?;
        url::Url::parse(&self.execution.quote_api_url).context("Invalid execution.quote_api_url")?;

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
    confirm_timeout: {}ms
  Stream:
    ws_url: {}
    account_include: {:?}
    commitment: {}
    reconnect_delay: {}ms
    queue_capacity: {}
  Detector:
    liquidity_threshold: {} SOL
    pool_authority: {}
    pools: pumpfun={} pumpswap={} raydium_launchlab={} raydium_cpmm={}
  Trading:
    sniper_amount: {} SOL
    profit_target: {}x
    stop_loss: {}x
    max_hold_time: {}ms
    max_positions: {}
    slippage: {}bps
  Risk:
    max_daily_loss: {} SOL
    max_single_loss: {} SOL
    trade_cooldown: {}ms
  Execution:
    route: {}
    max_retries: {}
    retry_delay: {}ms
    priority_fee: {} lamports
    relay_tip: {} lamports -> {}
    bundle_tip: {} lamports
    relay_url: {}
    relay_api_key: {}
    quote_api_url: {}
    dry_run: {}
  Monitor:
    interval: {}ms
    close_on_shutdown: {}"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.rpc.confirm_timeout_ms,
            mask_url(&self.stream.ws_url),
            self.stream.account_include,
            self.stream.commitment,
            self.stream.reconnect_delay_ms,
            self.stream.queue_capacity,
            self.detector.liquidity_threshold,
            self.detector.pool_authority,
            self.detector.pools.pumpfun,
            self.detector.pools.pumpswap,
            self.detector.pools.raydium_launchlab,
            self.detector.pools.raydium_cpmm,
            self.trading.sniper_amount_sol,
            self.trading.profit_target,
            self.trading.stop_loss,
            self.trading.max_hold_time_ms,
            self.trading.max_positions,
            self.trading.slippage_bps,
            self.risk.max_daily_loss,
            self.risk.max_single_loss,
            self.risk.trade_cooldown_ms,
            self.execution.route,
            self.execution.max_retries,
            self.execution.retry_delay_ms,
            self.execution.priority_fee_lamports,
            self.execution.relay_tip_lamports,
            self.execution.tip_address,
            self.execution.bundle_tip_lamports,
            mask_url(&self.execution.relay_url),
            mask_secret(&self.execution.relay_api_key),
            mask_url(&self.execution.quote_api_url),
            self.execution.dry_run,
            self.monitor.interval_ms,
            self.monitor.close_on_shutdown,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            stream: StreamConfig::default(),
            detector: DetectorConfig::default(),
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.trading.sniper_amount_sol, 0.1);
        assert_eq!(config.trading.profit_target, 2.0);
        assert_eq!(config.trading.stop_loss, 0.5);
        assert_eq!(config.trading.max_hold_time_ms, 300_000);
        assert_eq!(config.trading.max_positions, 5);
        assert_eq!(config.risk.trade_cooldown_ms, 5000);
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.retry_delay_ms, 1000);
        assert_eq!(config.execution.relay_tip_lamports, 200_000);
        assert_eq!(config.execution.bundle_tip_lamports, 100_000);
        assert_eq!(config.detector.liquidity_threshold, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_route_aliases() {
        let route: SubmissionRoute = serde_json::from_str(r#""nozomi""#).unwrap();
        assert_eq!(route, SubmissionRoute::TipRelay);
        let route: SubmissionRoute = serde_json::from_str(r#""jito""#).unwrap();
        assert_eq!(route, SubmissionRoute::BundleTip);
        let route: SubmissionRoute = serde_json::from_str(r#""solana""#).unwrap();
        assert_eq!(route, SubmissionRoute::Standard);
    }

    #[test]
    fn test_validate_rejects_bad_ratios() {
        let mut config = Config::default();
        config.trading.profit_target = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.stop_loss = 1.2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.execution.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detector.pool_authority = "not-a-key".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[trading]
sniper_amount_sol = 0.25
max_positions = 3

[execution]
route = "tip_relay"
relay_tip_lamports = 300000
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.trading.sniper_amount_sol, 0.25);
        assert_eq!(config.trading.max_positions, 3);
        assert_eq!(config.execution.route, SubmissionRoute::TipRelay);
        assert_eq!(config.execution.relay_tip_lamports, 300_000);
        // untouched sections keep defaults
        assert_eq!(config.risk.max_daily_loss, 1.0);
    }

    #[test]
    fn test_pool_toggles() {
        let toggles = PoolToggles {
            pumpfun: false,
            ..PoolToggles::default()
        };
        assert!(!toggles.is_enabled(PoolStatus::PumpFun));
        assert!(toggles.is_enabled(PoolStatus::RaydiumCpmm));
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?api-key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
