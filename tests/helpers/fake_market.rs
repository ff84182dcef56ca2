use async_trait::async_trait;
use signal_scanner::error::ClientError;
use signal_scanner::types::{Candle, ExchangeSymbol, Ticker24hr, Timeframe};
use signal_scanner::MarketData;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory exchange. Every symbol with candles is a tradable USDT perpetual.
#[derive(Default)]
pub struct FakeMarket {
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    invalid: HashSet<String>,
    delays: HashMap<(String, Timeframe), Duration>,
    banned_until: Option<Instant>,
    calls: Mutex<Vec<(String, Timeframe)>>,
}

impl FakeMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.candles.insert((symbol.to_string(), timeframe), candles);
        self
    }

    /// Answer every request for `symbol` with the exchange's invalid-symbol error.
    pub fn with_invalid(mut self, symbol: &str) -> Self {
        self.invalid.insert(symbol.to_string());
        self
    }

    /// Delay every candle response for `symbol` on `timeframe`.
    pub fn with_delay(mut self, symbol: &str, timeframe: Timeframe, delay: Duration) -> Self {
        self.delays.insert((symbol.to_string(), timeframe), delay);
        self
    }

    /// Report an IP ban lasting `cooldown` from now.
    pub fn with_ban(mut self, cooldown: Duration) -> Self {
        self.banned_until = Some(Instant::now() + cooldown);
        self
    }

    /// Candle requests seen so far, in call order.
    pub fn calls(&self) -> Vec<(String, Timeframe)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.calls().iter().filter(|(s, _)| s == symbol).count()
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .candles
            .keys()
            .map(|(s, _)| s.clone())
            .chain(self.invalid.iter().cloned())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, ClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), timeframe));

        if let Some(delay) = self.delays.get(&(symbol.to_string(), timeframe)) {
            tokio::time::sleep(*delay).await;
        }

        if self.invalid.contains(symbol) {
            return Err(ClientError::InvalidSymbol {
                symbol: symbol.to_string(),
            });
        }
        match self.candles.get(&(symbol.to_string(), timeframe)) {
            Some(candles) => {
                let skip = candles.len().saturating_sub(limit as usize);
                Ok(candles[skip..].to_vec())
            }
            None => Err(ClientError::NetworkTransient {
                message: format!("no candles for {symbol} {timeframe}"),
            }),
        }
    }

    async fn fetch_exchange_symbols(&self) -> Result<Vec<ExchangeSymbol>, ClientError> {
        Ok(self
            .symbols()
            .into_iter()
            .map(|symbol| ExchangeSymbol {
                symbol,
                quote_asset: "USDT".to_string(),
                status: "TRADING".to_string(),
                contract_type: "PERPETUAL".to_string(),
            })
            .collect())
    }

    async fn fetch_24h_tickers(&self) -> Result<Vec<Ticker24hr>, ClientError> {
        Ok(self
            .symbols()
            .into_iter()
            .map(|symbol| Ticker24hr {
                symbol,
                quote_volume: "50000000".to_string(),
                last_price: "100".to_string(),
            })
            .collect())
    }

    fn ban_remaining(&self) -> Option<Duration> {
        self.banned_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }
}
