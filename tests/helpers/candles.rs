use chrono::{DateTime, TimeZone, Utc};
use signal_scanner::types::{Candle, Timeframe};

pub const BASE_VOLUME: f64 = 1000.0;

pub fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `start + step * i` for `len` points.
pub fn linear_trend(start: f64, step: f64, len: usize) -> Vec<f64> {
    (0..len).map(|i| start + step * i as f64).collect()
}

/// Closed candles following `closes`. Each opens at the previous close and
/// the last one trades twice the base volume.
pub fn candles_from_closes(closes: &[f64], timeframe: Timeframe) -> Vec<Candle> {
    let step = timeframe.duration();
    let last = closes.len().saturating_sub(1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            let open_time = series_start() + step * i as i32;
            Candle {
                open_time,
                close_time: open_time + step - chrono::Duration::milliseconds(1),
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: if i == last { 2.0 * BASE_VOLUME } else { BASE_VOLUME },
            }
        })
        .collect()
}

/// Binance kline rows for `candles`, as served by `GET /fapi/v1/klines`.
pub fn kline_json(candles: &[Candle]) -> String {
    let rows: Vec<serde_json::Value> = candles
        .iter()
        .map(|c| {
            serde_json::json!([
                c.open_time.timestamp_millis(),
                c.open.to_string(),
                c.high.to_string(),
                c.low.to_string(),
                c.close.to_string(),
                c.volume.to_string(),
                c.close_time.timestamp_millis(),
                "0",
                100,
                "0",
                "0",
                "0"
            ])
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}
