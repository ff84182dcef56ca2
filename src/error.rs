//! Error taxonomy for the scan pipeline.
//!
//! Per-symbol errors are isolated by the orchestrator; none of them abort a
//! cycle. `anyhow` is reserved for application wiring in `main`/`config`.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Failures at the market-data boundary.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transient network error: {message}")]
    NetworkTransient { message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("ip banned until {until}")]
    Banned { until: DateTime<Utc> },

    #[error("invalid symbol {symbol}")]
    InvalidSymbol { symbol: String },

    #[error("failed to decode response: {message}")]
    Decode { message: String },

    #[error("exchange error {status}: {body}")]
    Api { status: u16, body: String },
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::NetworkTransient { .. } | ClientError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode {
                message: err.to_string(),
            }
        } else {
            ClientError::NetworkTransient {
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("{indicator} needs {required} candles, got {available}")]
    InsufficientData {
        indicator: &'static str,
        required: usize,
        available: usize,
    },

    #[error("invalid {indicator} parameters")]
    InvalidParameter { indicator: &'static str },
}

/// Failures at the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An ACTIVE signal already holds the (symbol, direction, timeframe) key.
    #[error("active signal already exists for {symbol} {direction} {timeframe}")]
    Duplicate {
        symbol: String,
        direction: String,
        timeframe: String,
    },

    #[error("signal {id} not found")]
    NotFound { id: String },

    #[error("signal {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// Constraint violation other than the ACTIVE key, e.g. a reused id.
    #[error("persistence conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Per-symbol outcome that prevented a signal from being evaluated.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}
