#![allow(dead_code)]

pub mod candles;
pub mod fake_market;

pub use candles::{candles_from_closes, kline_json, linear_trend};
pub use fake_market::FakeMarket;
