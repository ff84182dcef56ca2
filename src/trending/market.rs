// Market categories and their parameter bundles

use crate::types::{MarketCategory, Timeframe};
use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashMap;

const MAJOR_BASES: &[&str] = &["BTC", "ETH"];

const LARGE_CAP_BASES: &[&str] = &[
    "BNB", "SOL", "XRP", "ADA", "AVAX", "DOT", "LINK", "LTC", "TRX", "MATIC", "ATOM", "NEAR",
    "BCH", "TON", "UNI", "APT", "ARB", "OP", "SUI", "FIL",
];

const MEME_BASES: &[&str] = &[
    "DOGE", "SHIB", "PEPE", "FLOKI", "BONK", "WIF", "MEME", "BOME", "TURBO", "NEIRO", "PNUT",
    "TRUMP", "POPCAT", "MOG", "BRETT",
];

const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD"];

/// Classify a futures symbol into a closed set of market categories.
///
/// `1000PEPEUSDT`-style multiplier contracts are always meme coins.
pub fn classify(symbol: &str) -> MarketCategory {
    let upper = symbol.to_ascii_uppercase();
    if upper.starts_with("1000") {
        return MarketCategory::Meme;
    }
    let base = QUOTE_SUFFIXES
        .iter()
        .find_map(|q| upper.strip_suffix(q))
        .unwrap_or(upper.as_str());

    if MAJOR_BASES.contains(&base) {
        MarketCategory::Major
    } else if LARGE_CAP_BASES.contains(&base) {
        MarketCategory::LargeCap
    } else if MEME_BASES.contains(&base) {
        MarketCategory::Meme
    } else {
        MarketCategory::Default
    }
}

// ============================================================================
// Market config
// ============================================================================

/// Immutable per-category parameters, resolved once per symbol per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketConfig {
    pub rsi_long_min: f64,
    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub rsi_short_max: f64,
    /// ADX floor for the "trending" rule
    pub adx_min: f64,
    pub sl_atr_multiplier: f64,
    pub tp_atr_multiplier: f64,
    pub min_confidence: f64,
    pub preferred_timeframes: Vec<Timeframe>,
    /// ACTIVE signals older than this are swept to EXPIRED
    pub signal_ttl: Duration,
}

impl MarketConfig {
    pub fn for_category(category: MarketCategory) -> Self {
        match category {
            MarketCategory::Major => Self {
                rsi_long_min: 50.0,
                rsi_long_max: 70.0,
                rsi_short_min: 30.0,
                rsi_short_max: 50.0,
                adx_min: 20.0,
                sl_atr_multiplier: 1.5,
                tp_atr_multiplier: 3.0,
                min_confidence: 0.7,
                preferred_timeframes: vec![Timeframe::H1, Timeframe::H4],
                signal_ttl: Duration::hours(24),
            },
            MarketCategory::LargeCap => Self {
                rsi_long_min: 52.0,
                rsi_long_max: 72.0,
                rsi_short_min: 28.0,
                rsi_short_max: 48.0,
                adx_min: 22.0,
                sl_atr_multiplier: 1.8,
                tp_atr_multiplier: 3.5,
                min_confidence: 0.7,
                preferred_timeframes: vec![Timeframe::H1, Timeframe::H4],
                signal_ttl: Duration::hours(12),
            },
            MarketCategory::Meme => Self {
                rsi_long_min: 55.0,
                rsi_long_max: 75.0,
                rsi_short_min: 25.0,
                rsi_short_max: 45.0,
                adx_min: 25.0,
                sl_atr_multiplier: 2.5,
                tp_atr_multiplier: 5.0,
                min_confidence: 0.75,
                preferred_timeframes: vec![Timeframe::M15, Timeframe::H1],
                signal_ttl: Duration::hours(6),
            },
            MarketCategory::Default => Self {
                rsi_long_min: 50.0,
                rsi_long_max: 70.0,
                rsi_short_min: 30.0,
                rsi_short_max: 50.0,
                adx_min: 20.0,
                sl_atr_multiplier: 2.0,
                tp_atr_multiplier: 4.0,
                min_confidence: 0.7,
                preferred_timeframes: vec![Timeframe::H1, Timeframe::H4],
                signal_ttl: Duration::hours(12),
            },
        }
    }

    /// Higher timeframe to confirm against, if `timeframe` sits below the
    /// category's highest preferred timeframe.
    pub fn confirmation_timeframe(&self, timeframe: Timeframe) -> Option<Timeframe> {
        let preferred = self.preferred_timeframes.iter().max()?;
        if timeframe < *preferred {
            timeframe.next_higher()
        } else {
            None
        }
    }
}

/// Partial `MarketConfig` read from the `markets` YAML section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketConfigOverride {
    pub rsi_long_min: Option<f64>,
    pub rsi_long_max: Option<f64>,
    pub rsi_short_min: Option<f64>,
    pub rsi_short_max: Option<f64>,
    pub adx_min: Option<f64>,
    pub sl_atr_multiplier: Option<f64>,
    pub tp_atr_multiplier: Option<f64>,
    pub min_confidence: Option<f64>,
    pub preferred_timeframes: Option<Vec<Timeframe>>,
    pub signal_ttl_hours: Option<u32>,
}

impl MarketConfigOverride {
    pub fn apply(&self, base: MarketConfig) -> MarketConfig {
        MarketConfig {
            rsi_long_min: self.rsi_long_min.unwrap_or(base.rsi_long_min),
            rsi_long_max: self.rsi_long_max.unwrap_or(base.rsi_long_max),
            rsi_short_min: self.rsi_short_min.unwrap_or(base.rsi_short_min),
            rsi_short_max: self.rsi_short_max.unwrap_or(base.rsi_short_max),
            adx_min: self.adx_min.unwrap_or(base.adx_min),
            sl_atr_multiplier: self.sl_atr_multiplier.unwrap_or(base.sl_atr_multiplier),
            tp_atr_multiplier: self.tp_atr_multiplier.unwrap_or(base.tp_atr_multiplier),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            preferred_timeframes: self
                .preferred_timeframes
                .clone()
                .unwrap_or(base.preferred_timeframes),
            signal_ttl: self
                .signal_ttl_hours
                .map(|h| Duration::hours(h as i64))
                .unwrap_or(base.signal_ttl),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rsi_bounds = [
            ("rsi_long_min", self.rsi_long_min),
            ("rsi_long_max", self.rsi_long_max),
            ("rsi_short_min", self.rsi_short_min),
            ("rsi_short_max", self.rsi_short_max),
        ];
        for (name, value) in rsi_bounds {
            if let Some(v) = value {
                if !(0.0..=100.0).contains(&v) {
                    return Err(anyhow!("{name} must be within [0, 100], got {v}"));
                }
            }
        }
        if let Some(v) = self.min_confidence {
            if !(0.0..=1.0).contains(&v) {
                return Err(anyhow!("min_confidence must be within [0, 1], got {v}"));
            }
        }
        let multipliers = [
            ("sl_atr_multiplier", self.sl_atr_multiplier),
            ("tp_atr_multiplier", self.tp_atr_multiplier),
        ];
        for (name, value) in multipliers {
            if let Some(v) = value {
                if v <= 0.0 {
                    return Err(anyhow!("{name} must be positive, got {v}"));
                }
            }
        }
        if self.signal_ttl_hours == Some(0) {
            return Err(anyhow!("signal_ttl_hours must be positive"));
        }
        if matches!(&self.preferred_timeframes, Some(list) if list.is_empty()) {
            return Err(anyhow!("preferred_timeframes must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Maps a symbol to its category and effective config. Holds no mutable state.
#[derive(Debug, Clone, Default)]
pub struct MarketResolver {
    overrides: HashMap<MarketCategory, MarketConfigOverride>,
}

impl MarketResolver {
    pub fn new(overrides: HashMap<MarketCategory, MarketConfigOverride>) -> Self {
        Self { overrides }
    }

    pub fn config_for(&self, category: MarketCategory) -> MarketConfig {
        let base = MarketConfig::for_category(category);
        match self.overrides.get(&category) {
            Some(o) => o.apply(base),
            None => base,
        }
    }

    pub fn resolve(&self, symbol: &str) -> (MarketCategory, MarketConfig) {
        let category = classify(symbol);
        (category, self.config_for(category))
    }
}
