// End-to-end scoring scenarios on hand-built and computed snapshots

mod helpers;

use chrono::{TimeZone, Utc};
use helpers::{candles_from_closes, linear_trend};
use signal_scanner::trending::indicators::{
    compute_snapshot, AdxOutput, BollingerBands, HeikinAshi, MacdOutput,
};
use signal_scanner::trending::{classify, evaluate, score_direction, IndicatorSnapshot, MarketConfig};
use signal_scanner::types::{Direction, MarketCategory, Timeframe};

/// BTCUSDT on H1 with every LONG rule satisfied.
fn bullish_btc() -> IndicatorSnapshot {
    IndicatorSnapshot {
        candle_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        close: 105.0,
        rsi: 62.0,
        macd: MacdOutput {
            line: 0.8,
            signal: 0.5,
            histogram: 0.3,
            prev_histogram: -0.2,
        },
        ema9: 104.0,
        ema21: 102.0,
        ema50: 100.0,
        ema200: Some(95.0),
        atr: 2.0,
        adx: AdxOutput {
            adx: 24.0,
            plus_di: 28.0,
            minus_di: 14.0,
        },
        bollinger: BollingerBands {
            upper: 108.0,
            middle: 102.0,
            lower: 96.0,
        },
        heikin_ashi: HeikinAshi {
            open: 103.5,
            high: 105.5,
            low: 103.0,
            close: 104.8,
        },
        volume: 1300.0,
        volume_avg: 1000.0,
    }
}

#[test]
fn strong_uptrend_emits_full_confidence_long() {
    assert_eq!(classify("BTCUSDT"), MarketCategory::Major);
    let cfg = MarketConfig::for_category(MarketCategory::Major);

    let candidate = evaluate("BTCUSDT", Timeframe::H1, MarketCategory::Major, &cfg, &bullish_btc())
        .expect("candidate");

    assert_eq!(candidate.direction, Direction::Long);
    assert_eq!(candidate.confidence, 1.0);
    assert_eq!(candidate.entry, 105.0);
    assert!((candidate.stop_loss - (105.0 - 2.0 * 1.5)).abs() < 1e-9);
    assert!((candidate.take_profit - (105.0 + 2.0 * 3.0)).abs() < 1e-9);
    assert_eq!(candidate.market_category, MarketCategory::Major);
    assert!(candidate.rationale.contains("macd_cross_up"));
}

#[test]
fn weak_adx_lowers_confidence_below_custom_threshold() {
    let mut snapshot = bullish_btc();
    snapshot.adx.adx = 15.0;

    let mut cfg = MarketConfig::for_category(MarketCategory::Major);
    let long = score_direction(&snapshot, &cfg, Direction::Long);
    assert_eq!(long.confidence, 0.875);
    assert!(!long.fired.contains(&"adx_trending"));

    let candidate = evaluate("BTCUSDT", Timeframe::H1, MarketCategory::Major, &cfg, &snapshot)
        .expect("0.875 clears the default 0.7 floor");
    assert_eq!(candidate.confidence, 0.875);

    cfg.min_confidence = 0.9;
    assert!(evaluate("BTCUSDT", Timeframe::H1, MarketCategory::Major, &cfg, &snapshot).is_none());
}

#[test]
fn each_missing_rule_costs_one_eighth() {
    let cfg = MarketConfig::for_category(MarketCategory::Major);
    let cases: [(&str, fn(&mut IndicatorSnapshot)); 8] = [
        ("macd_cross_up", |s| s.macd.prev_histogram = 0.1),
        ("rsi_long_band", |s| s.rsi = 75.0),
        ("price_above_ema50", |s| s.close = 99.0),
        ("adx_trending", |s| s.adx.adx = 20.0),
        ("heikin_ashi_bullish", |s| s.heikin_ashi.close = 103.0),
        ("volume_surge", |s| s.volume = 1100.0),
        ("ema_stack_bullish", |s| s.ema21 = 104.5),
        ("plus_di_dominant", |s| s.adx.minus_di = 30.0),
    ];

    for (rule, mutate) in cases {
        let mut snapshot = bullish_btc();
        mutate(&mut snapshot);
        let long = score_direction(&snapshot, &cfg, Direction::Long);
        assert!(!long.fired.contains(&rule), "{rule} still fired");
        assert_eq!(long.confidence, 0.875, "{rule}: {:?}", long.fired);
    }
}

#[test]
fn opposing_signals_below_threshold_yield_nothing() {
    let cfg = MarketConfig::for_category(MarketCategory::Major);
    let mut snapshot = bullish_btc();
    snapshot.macd.prev_histogram = 0.1;
    snapshot.rsi = 50.0;
    snapshot.close = 99.0;
    snapshot.adx.adx = 10.0;
    snapshot.volume = 1000.0;

    let long = score_direction(&snapshot, &cfg, Direction::Long);
    let short = score_direction(&snapshot, &cfg, Direction::Short);
    assert!(long.confidence < cfg.min_confidence);
    assert!(short.confidence < cfg.min_confidence);
    assert!(evaluate("BTCUSDT", Timeframe::H1, MarketCategory::Major, &cfg, &snapshot).is_none());
}

#[test]
fn steady_climb_scores_long_from_real_candles() {
    let candles = candles_from_closes(&linear_trend(100.0, 0.5, 120), Timeframe::H4);
    let snapshot = compute_snapshot(&candles).expect("snapshot");

    // Monotonic gains saturate RSI and the MACD histogram never crosses
    assert_eq!(snapshot.rsi, 100.0);
    assert!(!snapshot.macd.crossed_up());
    assert!(snapshot.ema9 > snapshot.ema21 && snapshot.ema21 > snapshot.ema50);

    let cfg = MarketConfig::for_category(MarketCategory::Major);
    let candidate = evaluate("BTCUSDT", Timeframe::H4, MarketCategory::Major, &cfg, &snapshot)
        .expect("candidate");
    assert_eq!(candidate.direction, Direction::Long);
    assert_eq!(candidate.confidence, 0.75);
    assert_eq!(candidate.timestamp, candles.last().unwrap().open_time);
    assert!(candidate.stop_loss < candidate.entry && candidate.entry < candidate.take_profit);
}

#[test]
fn steady_decline_scores_short_for_meme_coins() {
    let candles = candles_from_closes(&linear_trend(200.0, -0.5, 120), Timeframe::H1);
    let snapshot = compute_snapshot(&candles).expect("snapshot");

    let category = classify("1000PEPEUSDT");
    assert_eq!(category, MarketCategory::Meme);
    let cfg = MarketConfig::for_category(category);
    let candidate =
        evaluate("1000PEPEUSDT", Timeframe::H1, category, &cfg, &snapshot).expect("candidate");

    assert_eq!(candidate.direction, Direction::Short);
    assert_eq!(candidate.confidence, 0.75);
    assert_eq!(candidate.sl_multiplier, 2.5);
    assert!(candidate.take_profit < candidate.entry && candidate.entry < candidate.stop_loss);
}
