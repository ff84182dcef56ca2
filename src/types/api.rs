// Binance USDⓈ-M futures REST wire types

use serde::Deserialize;

/// Error body returned alongside 4xx responses, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub quote_asset: String,
    pub status: String,
    #[serde(default)]
    pub contract_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    pub quote_volume: String,
    #[serde(default)]
    pub last_price: String,
}

/// One kline row: `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub type RawKline = Vec<serde_json::Value>;
