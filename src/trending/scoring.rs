// Rule-based signal scoring
//
// Each direction has its own table of weighted boolean rules. Confidence is the
// achieved weight over the direction's total weight.

use crate::trending::indicators::IndicatorSnapshot;
use crate::trending::market::MarketConfig;
use crate::types::{Candidate, Direction, MarketCategory, RiskLevels, Timeframe};
use tracing::debug;

/// Volume on the last candle must reach this multiple of the trailing average.
pub const VOLUME_SURGE_RATIO: f64 = 1.2;

pub type Predicate = fn(&IndicatorSnapshot, &MarketConfig) -> bool;

#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub direction: Direction,
    pub weight: f64,
    pub predicate: Predicate,
}

// ============================================================================
// Rule table
// ============================================================================

#[rustfmt::skip]
pub const RULES: &[Rule] = &[
    Rule { name: "macd_cross_up", direction: Direction::Long, weight: 1.0, predicate: macd_cross_up },
    Rule { name: "rsi_long_band", direction: Direction::Long, weight: 1.0, predicate: rsi_long_band },
    Rule { name: "price_above_ema50", direction: Direction::Long, weight: 1.0, predicate: price_above_ema50 },
    Rule { name: "adx_trending", direction: Direction::Long, weight: 1.0, predicate: adx_trending },
    Rule { name: "heikin_ashi_bullish", direction: Direction::Long, weight: 1.0, predicate: ha_bullish },
    Rule { name: "volume_surge", direction: Direction::Long, weight: 1.0, predicate: volume_surge },
    Rule { name: "ema_stack_bullish", direction: Direction::Long, weight: 1.0, predicate: ema_stack_bullish },
    Rule { name: "plus_di_dominant", direction: Direction::Long, weight: 1.0, predicate: plus_di_dominant },
    Rule { name: "macd_cross_down", direction: Direction::Short, weight: 1.0, predicate: macd_cross_down },
    Rule { name: "rsi_short_band", direction: Direction::Short, weight: 1.0, predicate: rsi_short_band },
    Rule { name: "price_below_ema50", direction: Direction::Short, weight: 1.0, predicate: price_below_ema50 },
    Rule { name: "adx_trending", direction: Direction::Short, weight: 1.0, predicate: adx_trending },
    Rule { name: "heikin_ashi_bearish", direction: Direction::Short, weight: 1.0, predicate: ha_bearish },
    Rule { name: "volume_surge", direction: Direction::Short, weight: 1.0, predicate: volume_surge },
    Rule { name: "ema_stack_bearish", direction: Direction::Short, weight: 1.0, predicate: ema_stack_bearish },
    Rule { name: "minus_di_dominant", direction: Direction::Short, weight: 1.0, predicate: minus_di_dominant },
];

fn macd_cross_up(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.macd.crossed_up()
}

fn macd_cross_down(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.macd.crossed_down()
}

fn rsi_long_band(s: &IndicatorSnapshot, c: &MarketConfig) -> bool {
    (c.rsi_long_min..=c.rsi_long_max).contains(&s.rsi)
}

fn rsi_short_band(s: &IndicatorSnapshot, c: &MarketConfig) -> bool {
    (c.rsi_short_min..=c.rsi_short_max).contains(&s.rsi)
}

fn price_above_ema50(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.close > s.ema50
}

fn price_below_ema50(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.close < s.ema50
}

fn adx_trending(s: &IndicatorSnapshot, c: &MarketConfig) -> bool {
    s.adx.adx > c.adx_min
}

fn ha_bullish(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.heikin_ashi.is_bullish()
}

fn ha_bearish(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.heikin_ashi.is_bearish()
}

fn volume_surge(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.volume_avg > 0.0 && s.volume >= VOLUME_SURGE_RATIO * s.volume_avg
}

fn ema_stack_bullish(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.ema9 > s.ema21 && s.ema21 > s.ema50
}

fn ema_stack_bearish(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.ema9 < s.ema21 && s.ema21 < s.ema50
}

fn plus_di_dominant(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.adx.plus_di > s.adx.minus_di
}

fn minus_di_dominant(s: &IndicatorSnapshot, _: &MarketConfig) -> bool {
    s.adx.minus_di > s.adx.plus_di
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionScore {
    pub direction: Direction,
    pub score: f64,
    pub max_score: f64,
    pub confidence: f64,
    pub fired: Vec<&'static str>,
}

/// Evaluate every rule of `direction` against the snapshot.
pub fn score_direction(
    snapshot: &IndicatorSnapshot,
    config: &MarketConfig,
    direction: Direction,
) -> DirectionScore {
    let mut score = 0.0;
    let mut max_score = 0.0;
    let mut fired = Vec::new();

    for rule in RULES.iter().filter(|r| r.direction == direction) {
        max_score += rule.weight;
        if (rule.predicate)(snapshot, config) {
            score += rule.weight;
            fired.push(rule.name);
        }
    }

    let confidence = if max_score > 0.0 {
        (score / max_score).clamp(0.0, 1.0)
    } else {
        0.0
    };

    DirectionScore {
        direction,
        score,
        max_score,
        confidence,
        fired,
    }
}

/// Pick the winning direction, if any.
///
/// A direction qualifies at `confidence >= min_confidence`. When both qualify
/// the higher score wins; an exact tie yields nothing.
pub fn pick_direction(
    long: DirectionScore,
    short: DirectionScore,
    min_confidence: f64,
) -> Option<DirectionScore> {
    let long_ok = long.confidence >= min_confidence;
    let short_ok = short.confidence >= min_confidence;

    match (long_ok, short_ok) {
        (true, false) => Some(long),
        (false, true) => Some(short),
        (true, true) if long.score > short.score => Some(long),
        (true, true) if short.score > long.score => Some(short),
        _ => None,
    }
}

/// Score a snapshot and build a `Candidate` for the winning direction.
pub fn evaluate(
    symbol: &str,
    timeframe: Timeframe,
    category: MarketCategory,
    config: &MarketConfig,
    snapshot: &IndicatorSnapshot,
) -> Option<Candidate> {
    let long = score_direction(snapshot, config, Direction::Long);
    let short = score_direction(snapshot, config, Direction::Short);
    debug!(
        symbol,
        long_score = long.score,
        short_score = short.score,
        min_confidence = config.min_confidence,
        "SCORING: evaluated rule sets"
    );

    let winner = pick_direction(long, short, config.min_confidence)?;

    let entry = snapshot.close;
    let levels = RiskLevels::from_atr(
        winner.direction,
        entry,
        snapshot.atr,
        config.sl_atr_multiplier,
        config.tp_atr_multiplier,
    );
    if !(levels.stop_loss.is_finite() && levels.take_profit.is_finite())
        || levels.stop_loss <= 0.0
        || levels.take_profit <= 0.0
    {
        debug!(
            symbol,
            direction = %winner.direction,
            stop_loss = levels.stop_loss,
            take_profit = levels.take_profit,
            "SCORING: risk levels out of range, dropping candidate"
        );
        return None;
    }

    let rationale = format!(
        "{} {:.1}/{:.1} ({:.0}%): {}",
        winner.direction,
        winner.score,
        winner.max_score,
        winner.confidence * 100.0,
        winner.fired.join(", ")
    );

    Some(Candidate {
        symbol: symbol.to_string(),
        direction: winner.direction,
        timeframe,
        market_category: category,
        entry,
        stop_loss: levels.stop_loss,
        take_profit: levels.take_profit,
        atr: snapshot.atr,
        sl_multiplier: config.sl_atr_multiplier,
        tp_multiplier: config.tp_atr_multiplier,
        confidence: winner.confidence,
        contributing_rules: winner.fired,
        rationale,
        timestamp: snapshot.candle_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trending::indicators::{AdxOutput, BollingerBands, HeikinAshi, MacdOutput};
    use chrono::{TimeZone, Utc};

    fn neutral() -> IndicatorSnapshot {
        IndicatorSnapshot {
            candle_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            close: 100.0,
            rsi: 50.0,
            macd: MacdOutput {
                line: 0.0,
                signal: 0.0,
                histogram: 0.0,
                prev_histogram: 0.0,
            },
            ema9: 100.0,
            ema21: 100.0,
            ema50: 100.0,
            ema200: None,
            atr: 2.0,
            adx: AdxOutput {
                adx: 10.0,
                plus_di: 20.0,
                minus_di: 20.0,
            },
            bollinger: BollingerBands {
                upper: 104.0,
                middle: 100.0,
                lower: 96.0,
            },
            heikin_ashi: HeikinAshi {
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
            },
            volume: 1000.0,
            volume_avg: 1000.0,
        }
    }

    fn config() -> MarketConfig {
        MarketConfig::for_category(MarketCategory::Default)
    }

    #[test]
    fn every_direction_totals_eight() {
        for direction in [Direction::Long, Direction::Short] {
            let total: f64 = RULES
                .iter()
                .filter(|r| r.direction == direction)
                .map(|r| r.weight)
                .sum();
            assert_eq!(total, 8.0);
        }
    }

    #[test]
    fn individual_rules_fire_in_isolation() {
        let cfg = config();
        let cases: [(&str, Direction, fn(&mut IndicatorSnapshot)); 7] = [
            ("macd_cross_up", Direction::Long, |s| {
                s.macd.prev_histogram = -0.1;
                s.macd.histogram = 0.1;
            }),
            ("rsi_short_band", Direction::Short, |s| s.rsi = 40.0),
            ("price_above_ema50", Direction::Long, |s| s.ema50 = 90.0),
            ("heikin_ashi_bearish", Direction::Short, |s| s.heikin_ashi.close = 99.5),
            ("volume_surge", Direction::Long, |s| s.volume = 1200.0),
            ("ema_stack_bearish", Direction::Short, |s| {
                s.ema9 = 98.0;
                s.ema21 = 99.0;
            }),
            ("plus_di_dominant", Direction::Long, |s| s.adx.plus_di = 30.0),
        ];

        for (rule, direction, mutate) in cases {
            let mut snapshot = neutral();
            snapshot.rsi = 0.0;
            mutate(&mut snapshot);
            let scored = score_direction(&snapshot, &cfg, direction);
            assert!(scored.fired.contains(&rule), "{rule} did not fire: {:?}", scored.fired);
        }
    }

    #[test]
    fn exact_tie_yields_nothing() {
        let long = DirectionScore {
            direction: Direction::Long,
            score: 6.0,
            max_score: 8.0,
            confidence: 0.75,
            fired: vec![],
        };
        let short = DirectionScore {
            direction: Direction::Short,
            ..long.clone()
        };
        assert_eq!(pick_direction(long.clone(), short.clone(), 0.7), None);

        let stronger = DirectionScore {
            score: 7.0,
            confidence: 0.875,
            ..short
        };
        assert_eq!(
            pick_direction(long, stronger, 0.7).map(|d| d.direction),
            Some(Direction::Short)
        );
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let cfg = config();
        let snapshot = neutral();
        for direction in [Direction::Long, Direction::Short] {
            let scored = score_direction(&snapshot, &cfg, direction);
            assert!((0.0..=1.0).contains(&scored.confidence));
        }
    }

    #[test]
    fn risk_levels_follow_config_multipliers() {
        let cfg = config();
        let mut s = neutral();
        s.macd.prev_histogram = -0.5;
        s.macd.histogram = 0.5;
        s.rsi = 60.0;
        s.ema9 = 99.0;
        s.ema21 = 98.0;
        s.ema50 = 97.0;
        s.adx = AdxOutput {
            adx: 30.0,
            plus_di: 30.0,
            minus_di: 10.0,
        };
        s.heikin_ashi.close = 100.5;
        s.volume = 1500.0;

        let candidate = evaluate("FOOUSDT", Timeframe::H1, MarketCategory::Default, &cfg, &s).unwrap();
        assert_eq!(candidate.direction, Direction::Long);
        assert_eq!(candidate.confidence, 1.0);
        assert_eq!(candidate.stop_loss, 100.0 - 2.0 * cfg.sl_atr_multiplier);
        assert_eq!(candidate.take_profit, 100.0 + 2.0 * cfg.tp_atr_multiplier);
        assert_eq!(candidate.contributing_rules.len(), 8);
        assert!(candidate.rationale.starts_with("LONG 8.0/8.0"));
    }

    fn fully_bearish() -> IndicatorSnapshot {
        let mut s = neutral();
        s.macd.prev_histogram = 0.1;
        s.macd.histogram = -0.1;
        s.rsi = 40.0;
        s.ema9 = 98.0;
        s.ema21 = 99.0;
        s.ema50 = 110.0;
        s.adx = AdxOutput {
            adx: 30.0,
            plus_di: 10.0,
            minus_di: 30.0,
        };
        s.heikin_ashi.close = 99.5;
        s.volume = 1500.0;
        s
    }

    #[test]
    fn unplaceable_levels_drop_the_candidate() {
        let cfg = config();
        let ok = evaluate("FOOUSDT", Timeframe::H1, MarketCategory::Default, &cfg, &fully_bearish());
        assert_eq!(ok.map(|c| c.direction), Some(Direction::Short));

        // 100 - 30 * 4.0 puts take-profit below zero
        let mut wide = fully_bearish();
        wide.atr = 30.0;
        assert_eq!(score_direction(&wide, &cfg, Direction::Short).confidence, 1.0);
        assert!(evaluate("FOOUSDT", Timeframe::H1, MarketCategory::Default, &cfg, &wide).is_none());

        let mut broken = fully_bearish();
        broken.atr = f64::NAN;
        assert!(evaluate("FOOUSDT", Timeframe::H1, MarketCategory::Default, &cfg, &broken).is_none());
    }
}
