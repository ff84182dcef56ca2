// Rate-limited market data client for Binance USDⓈ-M futures

pub mod rate_limiter;
pub mod retry;

use crate::config::BinanceCfg;
use crate::error::ClientError;
use crate::types::{ApiErrorBody, Candle, ExchangeInfoResponse, ExchangeSymbol, RawKline, Ticker24hr, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rate_limiter::RateLimiter;
use reqwest::{Client, StatusCode, Url};
use retry::RetryPolicy;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Binance error code for an unknown or delisted symbol.
const INVALID_SYMBOL_CODE: i64 = -1121;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const DEFAULT_BAN_COOLDOWN: Duration = Duration::from_secs(60);
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

const TICKER_24HR_WEIGHT: u32 = 40;
const EXCHANGE_INFO_WEIGHT: u32 = 1;

// ============================================================================
// Market data seam
// ============================================================================

/// Read-only view of the exchange used by the scan pipeline.
///
/// Every call through the real client is weight-budgeted and retried under a
/// single policy; tests substitute in-memory implementations.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Closed candles, oldest first. The still-forming candle is never included.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, ClientError>;

    async fn fetch_exchange_symbols(&self) -> Result<Vec<ExchangeSymbol>, ClientError>;

    async fn fetch_24h_tickers(&self) -> Result<Vec<Ticker24hr>, ClientError>;

    /// Remaining IP-ban cooldown, `None` when requests are allowed.
    fn ban_remaining(&self) -> Option<Duration>;

    fn is_banned(&self) -> bool {
        self.ban_remaining().is_some()
    }
}

// ============================================================================
// REST client
// ============================================================================

#[derive(Clone)]
pub struct MarketDataClient {
    http: Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl MarketDataClient {
    pub fn new(cfg: &BinanceCfg, retry: RetryPolicy) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(
            cfg.max_weight_per_minute,
            cfg.weight_safety_factor,
        ));
        Self::with_limiter(
            &cfg.base_url,
            Duration::from_secs(cfg.request_timeout_secs),
            limiter,
            retry,
        )
    }

    pub fn with_limiter(
        base_url: &str,
        request_timeout: Duration,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            limiter,
            retry,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
        symbol: Option<&str>,
    ) -> Result<T, ClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(path, query, weight, symbol).await {
                Ok(value) => return Ok(value),
                Err(err) => match self.retry.next_delay(&err, attempt) {
                    Some(delay) => {
                        warn!(
                            path,
                            symbol = symbol.unwrap_or("-"),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "CONNECTION: request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
        symbol: Option<&str>,
    ) -> Result<T, ClientError> {
        if let Some(until) = self.limiter.banned_until() {
            return Err(ClientError::Banned { until });
        }
        self.limiter.acquire(weight).await;

        let mut url = self.base_url.join(path).map_err(|e| ClientError::Api {
            status: 0,
            body: format!("invalid url for {path}: {e}"),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let res = self.http.get(url).send().await?;

        if let Some(used) = res
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.limiter.reconcile(used);
        }

        let status = res.status();
        if !status.is_success() {
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = res.text().await.unwrap_or_default();
            let err = classify_error(status, retry_after, &body, symbol, Utc::now());

            if let ClientError::Banned { until } = &err {
                let cooldown = (*until - Utc::now()).to_std().unwrap_or(DEFAULT_BAN_COOLDOWN);
                let until = self.limiter.enter_ban(cooldown);
                return Err(ClientError::Banned { until });
            }
            if let ClientError::RateLimited { retry_after } = &err {
                warn!(
                    path,
                    retry_after_secs = retry_after.as_secs(),
                    "CONNECTION: rate limited (429)"
                );
            }
            return Err(err);
        }

        let bytes = res.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
            message: format!("{path}: {e}"),
        })
    }
}

#[async_trait]
impl MarketData for MarketDataClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, ClientError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let raw: Vec<RawKline> = self
            .get_json("/fapi/v1/klines", &query, kline_weight(limit), Some(symbol))
            .await?;
        let candles = parse_klines(raw, Utc::now());
        debug!(
            symbol,
            timeframe = %timeframe,
            count = candles.len(),
            "CONNECTION: fetched closed candles"
        );
        Ok(candles)
    }

    async fn fetch_exchange_symbols(&self) -> Result<Vec<ExchangeSymbol>, ClientError> {
        let info: ExchangeInfoResponse = self
            .get_json("/fapi/v1/exchangeInfo", &[], EXCHANGE_INFO_WEIGHT, None)
            .await?;
        Ok(info.symbols)
    }

    async fn fetch_24h_tickers(&self) -> Result<Vec<Ticker24hr>, ClientError> {
        self.get_json("/fapi/v1/ticker/24hr", &[], TICKER_24HR_WEIGHT, None)
            .await
    }

    fn ban_remaining(&self) -> Option<Duration> {
        self.limiter.ban_remaining()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Request weight of `GET /fapi/v1/klines` for a given `limit`.
pub fn kline_weight(limit: u32) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Map a non-success response to the client error taxonomy.
pub fn classify_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
    symbol: Option<&str>,
    now: DateTime<Utc>,
) -> ClientError {
    match status.as_u16() {
        429 => ClientError::RateLimited {
            retry_after: retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        },
        418 => {
            let until = retry_after_secs
                .map(|secs| now + chrono::Duration::seconds(secs as i64))
                .or_else(|| parse_banned_until(body))
                .unwrap_or_else(|| {
                    now + chrono::Duration::seconds(DEFAULT_BAN_COOLDOWN.as_secs() as i64)
                });
            ClientError::Banned { until }
        }
        408 | 500..=599 => ClientError::NetworkTransient {
            message: format!("HTTP {status}: {body}"),
        },
        code => match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(api) if api.code == INVALID_SYMBOL_CODE => ClientError::InvalidSymbol {
                symbol: symbol.unwrap_or_default().to_string(),
            },
            _ => ClientError::Api {
                status: code,
                body: body.to_string(),
            },
        },
    }
}

/// Extract the epoch-ms timestamp from `"... banned until 1700000000000 ..."`.
fn parse_banned_until(body: &str) -> Option<DateTime<Utc>> {
    let msg = serde_json::from_str::<ApiErrorBody>(body)
        .map(|api| api.msg)
        .unwrap_or_else(|_| body.to_string());
    let rest = &msg[msg.find("banned until")? + "banned until".len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Utc.timestamp_millis_opt(digits.parse().ok()?).single()
}

/// Parse kline rows into closed candles sorted by open time.
///
/// Malformed rows are skipped; rows whose close time is not yet in the past
/// belong to the forming candle and are dropped.
pub fn parse_klines(raw: Vec<RawKline>, now: DateTime<Utc>) -> Vec<Candle> {
    let total = raw.len();
    let mut candles: Vec<Candle> = raw
        .into_iter()
        .filter_map(|arr| {
            if arr.len() < 7 {
                return None;
            }
            let open_time = Utc.timestamp_millis_opt(arr[0].as_i64()?).single()?;
            let close_time = Utc.timestamp_millis_opt(arr[6].as_i64()?).single()?;

            Some(Candle {
                open_time,
                close_time,
                open: parse_num(&arr[1])?,
                high: parse_num(&arr[2])?,
                low: parse_num(&arr[3])?,
                close: parse_num(&arr[4])?,
                volume: parse_num(&arr[5])?,
            })
        })
        .filter(|c| c.close_time < now)
        .collect();

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);

    if candles.len() + 1 < total {
        debug!(
            total,
            kept = candles.len(),
            "CONNECTION: dropped malformed or duplicate kline rows"
        );
    }
    candles
}

fn parse_num(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}
