// Technical indicators over a closed-candle window.
//
// Every function is pure and recomputes from the full slice it is given. Each
// declares its minimum window and fails with `InsufficientData` below it.

use crate::error::IndicatorError;
use crate::types::Candle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use ta::indicators::{ExponentialMovingAverage, MovingAverageConvergenceDivergence};
use ta::Next;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_DEV: f64 = 2.0;
pub const VOLUME_AVG_PERIOD: usize = 20;

// ============================================================================
// Output types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdOutput {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    /// Histogram one candle earlier
    pub prev_histogram: f64,
}

impl MacdOutput {
    pub fn crossed_up(&self) -> bool {
        self.prev_histogram <= 0.0 && self.histogram > 0.0
    }

    pub fn crossed_down(&self) -> bool {
        self.prev_histogram >= 0.0 && self.histogram < 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdxOutput {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeikinAshi {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl HeikinAshi {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Everything the scoring rules read, computed in one pass over the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub candle_time: DateTime<Utc>,
    pub close: f64,
    pub rsi: f64,
    pub macd: MacdOutput,
    pub ema9: f64,
    pub ema21: f64,
    pub ema50: f64,
    /// Informative only; `None` below 200 candles
    pub ema200: Option<f64>,
    pub atr: f64,
    pub adx: AdxOutput,
    pub bollinger: BollingerBands,
    pub heikin_ashi: HeikinAshi,
    pub volume: f64,
    pub volume_avg: f64,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Smallest window `compute_snapshot` accepts.
pub fn min_window() -> usize {
    [
        RSI_PERIOD + 1,
        MACD_SLOW + MACD_SIGNAL,
        50,
        ATR_PERIOD + 1,
        2 * ADX_PERIOD,
        BB_PERIOD,
        VOLUME_AVG_PERIOD + 1,
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

/// Compute the full indicator set over closed `candles` (oldest first).
pub fn compute_snapshot(candles: &[Candle]) -> Result<IndicatorSnapshot, IndicatorError> {
    let last = candles.last().ok_or(IndicatorError::InsufficientData {
        indicator: "snapshot",
        required: min_window(),
        available: 0,
    })?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let rsi = rsi(&closes, RSI_PERIOD)?;
    let macd = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL)?;
    let ema9 = ema(&closes, 9)?;
    let ema21 = ema(&closes, 21)?;
    let ema50 = ema(&closes, 50)?;
    let ema200 = ema(&closes, 200).ok();
    let atr = atr(candles, ATR_PERIOD)?;
    let adx = adx(candles, ADX_PERIOD)?;
    let bollinger = bollinger(&closes, BB_PERIOD, BB_STD_DEV)?;
    let heikin_ashi = heikin_ashi(candles)?
        .last()
        .copied()
        .ok_or(IndicatorError::InsufficientData {
            indicator: "HeikinAshi",
            required: 1,
            available: 0,
        })?;
    let volume_avg = volume_average(candles, VOLUME_AVG_PERIOD)?;

    Ok(IndicatorSnapshot {
        candle_time: last.open_time,
        close: last.close,
        rsi,
        macd,
        ema9,
        ema21,
        ema50,
        ema200,
        atr,
        adx,
        bollinger,
        heikin_ashi,
        volume: last.volume,
        volume_avg,
    })
}

// ============================================================================
// Individual indicators
// ============================================================================

fn require(indicator: &'static str, required: usize, available: usize) -> Result<(), IndicatorError> {
    if available < required {
        return Err(IndicatorError::InsufficientData {
            indicator,
            required,
            available,
        });
    }
    Ok(())
}

/// Wilder-smoothed RSI. Needs `period + 1` closes.
///
/// A window with no movement at all reads 50; no losses reads 100.
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter { indicator: "RSI" });
    }
    require("RSI", period + 1, closes.len())?;

    let p = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, w) in closes.windows(2).enumerate() {
        let change = w[1] - w[0];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if i < period {
            avg_gain += gain / p;
            avg_loss += loss / p;
        } else {
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        }
    }

    let value = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    Ok(value.clamp(0.0, 100.0))
}

/// EMA value at every point of `values`. Needs `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    let mut ema = ExponentialMovingAverage::new(period)
        .map_err(|_| IndicatorError::InvalidParameter { indicator: "EMA" })?;
    require("EMA", period, values.len())?;
    Ok(values.iter().map(|v| ema.next(*v)).collect())
}

pub fn ema(values: &[f64], period: usize) -> Result<f64, IndicatorError> {
    let series = ema_series(values, period)?;
    series.last().copied().ok_or(IndicatorError::InsufficientData {
        indicator: "EMA",
        required: period,
        available: 0,
    })
}

/// MACD line, signal and the last two histogram points.
/// Needs `slow + signal` closes.
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<MacdOutput, IndicatorError> {
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal)
        .map_err(|_| IndicatorError::InvalidParameter { indicator: "MACD" })?;
    require("MACD", slow + signal, closes.len())?;

    let mut out = MacdOutput {
        line: 0.0,
        signal: 0.0,
        histogram: 0.0,
        prev_histogram: 0.0,
    };
    for close in closes {
        let next = indicator.next(*close);
        out = MacdOutput {
            line: next.macd,
            signal: next.signal,
            histogram: next.histogram,
            prev_histogram: out.histogram,
        };
    }
    Ok(out)
}

fn true_range(current: &Candle, prev_close: f64) -> f64 {
    (current.high - current.low)
        .max((current.high - prev_close).abs())
        .max((current.low - prev_close).abs())
}

/// Wilder-smoothed ATR. Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter { indicator: "ATR" });
    }
    require("ATR", period + 1, candles.len())?;

    let p = period as f64;
    let mut value = 0.0;
    for (i, w) in candles.windows(2).enumerate() {
        let tr = true_range(&w[1], w[0].close);
        if i < period {
            value += tr / p;
        } else {
            value = (value * (p - 1.0) + tr) / p;
        }
    }
    Ok(value)
}

/// ADX with +DI/-DI, Wilder smoothing throughout. Needs `2 * period` candles.
pub fn adx(candles: &[Candle], period: usize) -> Result<AdxOutput, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter { indicator: "ADX" });
    }
    require("ADX", 2 * period, candles.len())?;

    let p = period as f64;
    let mut smoothed_tr = 0.0;
    let mut smoothed_plus = 0.0;
    let mut smoothed_minus = 0.0;
    let mut dx_sum = 0.0;
    let mut dx_count = 0usize;
    let mut adx = 0.0;
    let mut out = AdxOutput {
        adx: 0.0,
        plus_di: 0.0,
        minus_di: 0.0,
    };

    for (i, w) in candles.windows(2).enumerate() {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
        let tr = true_range(cur, prev.close);

        if i < period {
            smoothed_tr += tr;
            smoothed_plus += plus_dm;
            smoothed_minus += minus_dm;
            if i + 1 < period {
                continue;
            }
        } else {
            smoothed_tr = smoothed_tr - smoothed_tr / p + tr;
            smoothed_plus = smoothed_plus - smoothed_plus / p + plus_dm;
            smoothed_minus = smoothed_minus - smoothed_minus / p + minus_dm;
        }

        let (plus_di, minus_di) = if smoothed_tr > 0.0 {
            (
                100.0 * smoothed_plus / smoothed_tr,
                100.0 * smoothed_minus / smoothed_tr,
            )
        } else {
            (0.0, 0.0)
        };
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };

        if dx_count < period {
            dx_sum += dx;
            dx_count += 1;
            adx = dx_sum / dx_count as f64;
        } else {
            adx = (adx * (p - 1.0) + dx) / p;
        }

        out = AdxOutput {
            adx: adx.clamp(0.0, 100.0),
            plus_di: plus_di.clamp(0.0, 100.0),
            minus_di: minus_di.clamp(0.0, 100.0),
        };
    }
    Ok(out)
}

/// SMA(period) ± k·σ over the last `period` closes (population σ, two-pass).
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Result<BollingerBands, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter {
            indicator: "Bollinger",
        });
    }
    require("Bollinger", period, closes.len())?;

    let window = &closes[closes.len() - period..];
    let n = period as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    Ok(BollingerBands {
        upper: mean + k * std_dev,
        middle: mean,
        lower: mean - k * std_dev,
    })
}

/// Heikin-Ashi transform of the whole window, seeded from the first candle.
pub fn heikin_ashi(candles: &[Candle]) -> Result<Vec<HeikinAshi>, IndicatorError> {
    require("HeikinAshi", 1, candles.len())?;

    let mut out: Vec<HeikinAshi> = Vec::with_capacity(candles.len());
    for c in candles {
        let close = (c.open + c.high + c.low + c.close) / 4.0;
        let open = match out.last() {
            Some(prev) => (prev.open + prev.close) / 2.0,
            None => (c.open + c.close) / 2.0,
        };
        out.push(HeikinAshi {
            open,
            high: c.high.max(open).max(close),
            low: c.low.min(open).min(close),
            close,
        });
    }
    Ok(out)
}

/// Mean volume of the `period` candles preceding the last one.
pub fn volume_average(candles: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter { indicator: "Volume" });
    }
    require("Volume", period + 1, candles.len())?;

    let end = candles.len() - 1;
    let sum: f64 = candles[end - period..end].iter().map(|c| c.volume).sum();
    Ok(sum / period as f64)
}
