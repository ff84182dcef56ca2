use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Market data
// ============================================================================

/// Closed OHLCV aggregate for one (symbol, timeframe) interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const LADDER: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Binance kline interval string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// Next rung on the ladder, `None` for the daily timeframe.
    pub fn next_higher(&self) -> Option<Timeframe> {
        let idx = Self::LADDER.iter().position(|tf| tf == self)?;
        Self::LADDER.get(idx + 1).copied()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::LADDER
            .iter()
            .find(|tf| tf.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown timeframe '{s}'"))
    }
}

// ============================================================================
// Signals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for LONG, -1 for SHORT; used to place stop-loss/take-profit.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCategory {
    Major,
    LargeCap,
    Meme,
    Default,
}

impl MarketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCategory::Major => "major",
            MarketCategory::LargeCap => "large_cap",
            MarketCategory::Meme => "meme",
            MarketCategory::Default => "default",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(MarketCategory::Major),
            "large_cap" => Ok(MarketCategory::LargeCap),
            "meme" => Ok(MarketCategory::Meme),
            "default" => Ok(MarketCategory::Default),
            other => Err(format!("unknown market category '{other}'")),
        }
    }
}

/// Lifecycle state of a persisted signal. Only ACTIVE rows may transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Active,
    Executed,
    Expired,
    Cancelled,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Executed => "EXECUTED",
            SignalStatus::Expired => "EXPIRED",
            SignalStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SignalStatus::Active),
            "EXECUTED" => Ok(SignalStatus::Executed),
            "EXPIRED" => Ok(SignalStatus::Expired),
            "CANCELLED" => Ok(SignalStatus::Cancelled),
            other => Err(format!("unknown signal status '{other}'")),
        }
    }
}

/// Dedup key: at most one ACTIVE signal per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
}

/// Stop-loss / take-profit placement from ATR multiples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl RiskLevels {
    pub fn from_atr(
        direction: Direction,
        entry: f64,
        atr: f64,
        sl_multiplier: f64,
        tp_multiplier: f64,
    ) -> Self {
        let sign = direction.sign();
        Self {
            stop_loss: entry - sign * atr * sl_multiplier,
            take_profit: entry + sign * atr * tp_multiplier,
        }
    }
}

/// Provisional signal produced by scoring, pending confirmation and dedup.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    pub market_category: MarketCategory,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub atr: f64,
    pub sl_multiplier: f64,
    pub tp_multiplier: f64,
    pub confidence: f64,
    pub contributing_rules: Vec<&'static str>,
    pub rationale: String,
    /// Open time of the last closed candle the candidate was scored on.
    pub timestamp: DateTime<Utc>,
}

impl Candidate {
    pub fn key(&self) -> SignalKey {
        SignalKey {
            symbol: self.symbol.clone(),
            direction: self.direction,
            timeframe: self.timeframe,
        }
    }
}

/// Persisted, immutable signal payload. Also the event broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub atr: f64,
    pub sl_multiplier: f64,
    pub tp_multiplier: f64,
    pub confidence: f64,
    pub description: String,
    pub market_type: MarketCategory,
    pub status: SignalStatus,
    pub candle_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    pub fn key(&self) -> SignalKey {
        SignalKey {
            symbol: self.symbol.clone(),
            direction: self.direction,
            timeframe: self.timeframe,
        }
    }

    /// Recompute SL/TP from the stored entry, ATR and multipliers.
    pub fn recompute_levels(&self) -> RiskLevels {
        RiskLevels::from_atr(
            self.direction,
            self.entry,
            self.atr,
            self.sl_multiplier,
            self.tp_multiplier,
        )
    }
}
