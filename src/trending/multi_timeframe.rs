// Higher-timeframe confirmation of scored candidates

use crate::connection::MarketData;
use crate::error::IndicatorError;
use crate::trending::indicators::{ema_series, heikin_ashi};
use crate::trending::market::MarketConfig;
use crate::types::{Candidate, Candle, Direction, Timeframe};
use tracing::debug;

/// Candles requested on the confirming timeframe.
pub const HTF_KLINE_LIMIT: u32 = 100;
const HTF_EMA_PERIOD: usize = 21;
/// EMA slope is measured between the last point and this many points back.
const SLOPE_LOOKBACK: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    /// Flat never contradicts.
    pub fn contradicts(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TrendDirection::Down, Direction::Long) | (TrendDirection::Up, Direction::Short)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Signal timeframe already at or above the category's preferred timeframe
    NotRequired,
    Confirmed { timeframe: Timeframe, trend: TrendDirection },
    Rejected { timeframe: Timeframe, trend: TrendDirection },
    /// Higher timeframe could not be evaluated; treated as not confirmed
    Unavailable { timeframe: Timeframe, reason: String },
}

impl Confirmation {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Confirmation::NotRequired | Confirmation::Confirmed { .. }
        )
    }
}

/// Trend of a higher-timeframe window.
///
/// Up needs a bullish Heikin-Ashi candle and a rising EMA21 over the last
/// three closes; Down needs both bearish; anything else is Flat.
pub fn classify_trend(candles: &[Candle]) -> Result<TrendDirection, IndicatorError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema = ema_series(&closes, HTF_EMA_PERIOD.max(SLOPE_LOOKBACK + 1))?;
    let ha = heikin_ashi(candles)?;

    let (Some(last_ha), Some(last_ema)) = (ha.last(), ema.last()) else {
        return Ok(TrendDirection::Flat);
    };
    let slope = last_ema - ema[ema.len() - 1 - SLOPE_LOOKBACK];

    Ok(if last_ha.is_bullish() && slope > 0.0 {
        TrendDirection::Up
    } else if last_ha.is_bearish() && slope < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    })
}

/// Check a candidate against the next-higher timeframe when its category asks for it.
pub async fn confirm(
    market: &dyn MarketData,
    candidate: &Candidate,
    config: &MarketConfig,
) -> Confirmation {
    let Some(timeframe) = config.confirmation_timeframe(candidate.timeframe) else {
        return Confirmation::NotRequired;
    };

    let candles = match market
        .fetch_candles(&candidate.symbol, timeframe, HTF_KLINE_LIMIT)
        .await
    {
        Ok(candles) => candles,
        Err(err) => {
            return Confirmation::Unavailable {
                timeframe,
                reason: err.to_string(),
            }
        }
    };

    match classify_trend(&candles) {
        Ok(trend) if trend.contradicts(candidate.direction) => {
            debug!(
                symbol = %candidate.symbol,
                direction = %candidate.direction,
                higher_timeframe = %timeframe,
                ?trend,
                "MTF: higher timeframe contradicts candidate"
            );
            Confirmation::Rejected { timeframe, trend }
        }
        Ok(trend) => Confirmation::Confirmed { timeframe, trend },
        Err(err) => Confirmation::Unavailable {
            timeframe,
            reason: err.to_string(),
        },
    }
}
