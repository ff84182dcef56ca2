pub mod api;
pub mod core;

pub use api::{ApiErrorBody, ExchangeInfoResponse, ExchangeSymbol, RawKline, Ticker24hr};
pub use core::{
    Candidate, Candle, Direction, MarketCategory, RiskLevels, Signal, SignalKey, SignalStatus,
    Timeframe,
};
