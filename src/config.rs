// Configuration structures and loading logic

use crate::connection::retry::RetryPolicy;
use crate::trending::market::MarketConfigOverride;
use crate::types::{MarketCategory, Timeframe};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct BinanceCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Published REQUEST_WEIGHT per minute (futures: 2400)
    #[serde(default = "default_max_weight_per_minute")]
    pub max_weight_per_minute: u32,
    /// Share of the published weight budget the scanner may use
    #[serde(default = "default_weight_safety_factor")]
    pub weight_safety_factor: f64,
}

impl Default for BinanceCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_weight_per_minute: default_max_weight_per_minute(),
            weight_safety_factor: default_weight_safety_factor(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryCfg {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerCfg {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum concurrent kline fetches
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Top-N symbols by 24h quote volume
    #[serde(default = "default_universe_size")]
    pub universe_size: usize,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume: f64,
    /// Upper bound for one symbol's fetch including retries
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Fixed universe; skips volume ranking when non-empty
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for ScannerCfg {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            universe_size: default_universe_size(),
            timeframe: default_timeframe(),
            kline_limit: default_kline_limit(),
            quote_asset: default_quote_asset(),
            min_quote_volume: default_min_quote_volume(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageCfg {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventBusCfg {
    /// Broadcast buffer for emitted signals; slow subscribers lag past this
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
}

impl Default for EventBusCfg {
    fn default() -> Self {
        Self {
            signal_buffer: default_signal_buffer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingCfg {
    /// JSON-lines file receiving every emitted signal
    #[serde(default)]
    pub signal_log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpiryCfg {
    #[serde(default = "default_expiry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ExpiryCfg {
    fn default() -> Self {
        Self {
            enabled: default_expiry_enabled(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub binance: BinanceCfg,
    #[serde(default)]
    pub retry: RetryCfg,
    #[serde(default)]
    pub scanner: ScannerCfg,
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub event_bus: EventBusCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
    #[serde(default)]
    pub expiry: ExpiryCfg,
    /// Per-category overrides of the built-in market bundles
    #[serde(default)]
    pub markets: HashMap<MarketCategory, MarketConfigOverride>,
}

impl AppCfg {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scanner.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner.fetch_timeout_secs)
    }
}

// ============================================================================
// Default Value Functions
// ============================================================================

fn default_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_weight_per_minute() -> u32 {
    2400 // Binance USDⓈ-M futures REQUEST_WEIGHT per minute
}

fn default_weight_safety_factor() -> f64 {
    0.7
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    10
}

fn default_universe_size() -> usize {
    30
}

fn default_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_kline_limit() -> u32 {
    250 // enough for EMA200 plus warmup
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_min_quote_volume() -> f64 {
    1_000_000.0
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./signals.db")
}

fn default_signal_buffer() -> usize {
    256
}

fn default_expiry_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    300
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from `--config <path>` or `./config.yaml`.
///
/// `BINANCE_BASE_URL` and `SCANNER_DB_PATH` override the file when set.
pub fn load_config() -> Result<AppCfg> {
    let args: Vec<String> = std::env::args().collect();
    let path = args
        .windows(2)
        .find_map(|w| (w[0] == "--config").then(|| w[1].clone()))
        .unwrap_or_else(|| "./config.yaml".to_string());

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {path}"))?;
    let mut cfg = parse_config(&content)?;

    if let Ok(url) = std::env::var("BINANCE_BASE_URL") {
        if !url.trim().is_empty() {
            cfg.binance.base_url = url;
        }
    }
    if let Ok(db) = std::env::var("SCANNER_DB_PATH") {
        if !db.trim().is_empty() {
            cfg.storage.db_path = PathBuf::from(db);
        }
    }

    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config(content: &str) -> Result<AppCfg> {
    serde_yaml::from_str(content).context("invalid config yaml")
}

/// Validate configuration values
pub fn validate_config(cfg: &AppCfg) -> Result<()> {
    if cfg.scanner.poll_interval_secs == 0 {
        return Err(anyhow!("scanner.poll_interval_secs must be positive"));
    }
    if cfg.scanner.batch_size == 0 {
        return Err(anyhow!("scanner.batch_size must be positive"));
    }
    if cfg.scanner.universe_size == 0 && cfg.scanner.symbols.is_empty() {
        return Err(anyhow!(
            "scanner.universe_size must be positive when no fixed symbols are configured"
        ));
    }
    if cfg.scanner.kline_limit == 0 || cfg.scanner.kline_limit > 1500 {
        return Err(anyhow!(
            "scanner.kline_limit must be in 1..=1500, got {}",
            cfg.scanner.kline_limit
        ));
    }
    if cfg.scanner.fetch_timeout_secs == 0 {
        return Err(anyhow!("scanner.fetch_timeout_secs must be positive"));
    }
    if cfg.scanner.quote_asset.trim().is_empty() {
        return Err(anyhow!("scanner.quote_asset must not be empty"));
    }
    if !(cfg.binance.weight_safety_factor > 0.0 && cfg.binance.weight_safety_factor <= 1.0) {
        return Err(anyhow!(
            "binance.weight_safety_factor must be in (0, 1], got {}",
            cfg.binance.weight_safety_factor
        ));
    }
    if cfg.binance.max_weight_per_minute == 0 {
        return Err(anyhow!("binance.max_weight_per_minute must be positive"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("retry.max_attempts must be at least 1"));
    }
    if cfg.event_bus.signal_buffer == 0 {
        return Err(anyhow!("event_bus.signal_buffer must be positive"));
    }
    for (category, overrides) in &cfg.markets {
        overrides
            .validate()
            .with_context(|| format!("invalid markets.{category} override"))?;
    }
    Ok(())
}
