// Universe selection: top-N perpetual contracts by 24h quote volume

use crate::config::ScannerCfg;
use crate::connection::MarketData;
use crate::error::ClientError;
use crate::types::{ExchangeSymbol, Ticker24hr};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct UniverseFilter {
    pub quote_asset: String,
    pub min_quote_volume: f64,
    pub universe_size: usize,
}

impl From<&ScannerCfg> for UniverseFilter {
    fn from(cfg: &ScannerCfg) -> Self {
        Self {
            quote_asset: cfg.quote_asset.clone(),
            min_quote_volume: cfg.min_quote_volume,
            universe_size: cfg.universe_size,
        }
    }
}

/// Rank tradable perpetuals by 24h quote volume and keep the top N.
///
/// Ties are broken by symbol name so the universe is deterministic.
pub fn select_universe(
    symbols: &[ExchangeSymbol],
    tickers: &[Ticker24hr],
    filter: &UniverseFilter,
    excluded: &HashSet<String>,
) -> Vec<String> {
    let tradable: HashSet<&str> = symbols
        .iter()
        .filter(|s| s.contract_type == "PERPETUAL")
        .filter(|s| s.status == "TRADING")
        .filter(|s| s.quote_asset.eq_ignore_ascii_case(&filter.quote_asset))
        .map(|s| s.symbol.as_str())
        .collect();

    let mut ranked: Vec<(&str, f64)> = tickers
        .iter()
        .filter(|t| tradable.contains(t.symbol.as_str()))
        .filter(|t| !excluded.contains(&t.symbol))
        .filter_map(|t| {
            let volume = t.quote_volume.parse::<f64>().ok()?;
            (volume.is_finite() && volume >= filter.min_quote_volume)
                .then_some((t.symbol.as_str(), volume))
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    ranked
        .into_iter()
        .take(filter.universe_size)
        .map(|(symbol, _)| symbol.to_string())
        .collect()
}

pub struct SymbolScanner {
    filter: UniverseFilter,
    /// Fixed universe from config; bypasses ranking when non-empty
    fixed: Vec<String>,
}

impl SymbolScanner {
    pub fn new(cfg: &ScannerCfg) -> Self {
        Self {
            filter: UniverseFilter::from(cfg),
            fixed: cfg.symbols.iter().map(|s| s.to_ascii_uppercase()).collect(),
        }
    }

    pub async fn select(
        &self,
        market: &dyn MarketData,
        excluded: &HashSet<String>,
    ) -> Result<Vec<String>, ClientError> {
        if !self.fixed.is_empty() {
            let universe: Vec<String> = self
                .fixed
                .iter()
                .filter(|s| !excluded.contains(*s))
                .cloned()
                .collect();
            debug!(count = universe.len(), "SYMBOL_SCANNER: using fixed universe");
            return Ok(universe);
        }

        let symbols = market.fetch_exchange_symbols().await?;
        let tickers = market.fetch_24h_tickers().await?;
        let universe = select_universe(&symbols, &tickers, &self.filter, excluded);

        info!(
            discovered = symbols.len(),
            selected = universe.len(),
            top = ?universe.iter().take(5).collect::<Vec<_>>(),
            "SYMBOL_SCANNER: universe selected"
        );
        Ok(universe)
    }
}
