// ORCHESTRATOR: serialized polling cycles
// SELECT_UNIVERSE -> FETCH -> COMPUTE -> SCORE -> CONFIRM -> GATE -> SLEEP

use crate::config::AppCfg;
use crate::connection::MarketData;
use crate::error::{ClientError, ScanError};
use crate::signal_gate::{GateOutcome, SignalGate};
use crate::symbol_scanner::SymbolScanner;
use crate::trending::indicators::compute_snapshot;
use crate::trending::market::MarketResolver;
use crate::trending::multi_timeframe::{confirm, Confirmation};
use crate::trending::scoring;
use crate::types::{Candle, Timeframe};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timeframe: Timeframe,
    pub kline_limit: u32,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
}

impl From<&AppCfg> for OrchestratorSettings {
    fn from(cfg: &AppCfg) -> Self {
        Self {
            timeframe: cfg.scanner.timeframe,
            kline_limit: cfg.scanner.kline_limit,
            batch_size: cfg.scanner.batch_size.max(1),
            poll_interval: cfg.poll_interval(),
            fetch_timeout: cfg.fetch_timeout(),
        }
    }
}

/// Per-cycle counters. `cancelled` cycles stopped at a checkpoint and are partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub universe: usize,
    pub fetched: usize,
    /// Fetch failed (retries exhausted, timeout, ban, invalid symbol)
    pub skipped: usize,
    pub insufficient: usize,
    pub candidates: usize,
    pub unconfirmed: usize,
    pub suppressed: usize,
    pub emitted: usize,
    /// Persistence failures
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Orchestrator {
    market: Arc<dyn MarketData>,
    scanner: SymbolScanner,
    resolver: MarketResolver,
    gate: Arc<SignalGate>,
    settings: OrchestratorSettings,
    /// Symbols the exchange rejected as invalid; excluded for the rest of the run
    invalid_symbols: HashSet<String>,
    cycle: u64,
}

impl Orchestrator {
    pub fn new(
        market: Arc<dyn MarketData>,
        scanner: SymbolScanner,
        resolver: MarketResolver,
        gate: Arc<SignalGate>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            market,
            scanner,
            resolver,
            gate,
            settings,
            invalid_symbols: HashSet::new(),
            cycle: 0,
        }
    }

    pub fn invalid_symbols(&self) -> &HashSet<String> {
        &self.invalid_symbols
    }

    /// Drive cycles until `cancel` fires. Never returns on per-cycle errors.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            timeframe = %self.settings.timeframe,
            batch_size = self.settings.batch_size,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "ORCHESTRATOR: started"
        );

        while !cancel.is_cancelled() {
            if let Some(remaining) = self.market.ban_remaining() {
                warn!(
                    remaining_secs = remaining.as_secs(),
                    "ORCHESTRATOR: exchange ban active, idling until cooldown ends"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => continue,
                }
            }

            let started = Instant::now();
            match self.run_cycle(&cancel).await {
                Ok(report) if report.cancelled => {
                    info!(cycle = self.cycle, ?report, "ORCHESTRATOR: cycle cancelled");
                    break;
                }
                Ok(report) => info!(
                    cycle = self.cycle,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    universe = report.universe,
                    fetched = report.fetched,
                    skipped = report.skipped,
                    insufficient = report.insufficient,
                    candidates = report.candidates,
                    unconfirmed = report.unconfirmed,
                    suppressed = report.suppressed,
                    emitted = report.emitted,
                    failed = report.failed,
                    "ORCHESTRATOR: cycle complete"
                ),
                Err(e) => warn!(cycle = self.cycle, error = %e, "ORCHESTRATOR: cycle aborted"),
            }

            let wait = self.settings.poll_interval.saturating_sub(started.elapsed());
            if wait.is_zero() {
                warn!(cycle = self.cycle, "ORCHESTRATOR: cycle overran poll interval");
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("ORCHESTRATOR: stopped");
    }

    /// Run one full cycle. Only universe selection failures abort it.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport, ScanError> {
        self.cycle += 1;
        let mut report = CycleReport::default();

        // SELECT_UNIVERSE
        let universe = self
            .scanner
            .select(self.market.as_ref(), &self.invalid_symbols)
            .await?;
        report.universe = universe.len();
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        // FETCH
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                report.cancelled = true;
                return Ok(report);
            }
            fetched = self.fetch_all(universe) => fetched,
        };

        let mut newly_invalid = Vec::new();
        for (symbol, result) in fetched {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let candles = match result {
                Ok(candles) => candles,
                Err(ScanError::Client(ClientError::InvalidSymbol { .. })) => {
                    warn!(symbol = %symbol, "ORCHESTRATOR: invalid symbol, excluding for this run");
                    newly_invalid.push(symbol);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "ORCHESTRATOR: fetch failed, skipping symbol");
                    report.skipped += 1;
                    continue;
                }
            };
            report.fetched += 1;

            self.process_symbol(&symbol, &candles, cancel, &mut report).await;
        }

        self.invalid_symbols.extend(newly_invalid);
        Ok(report)
    }

    /// Fetch every symbol with bounded concurrency, in universe order.
    async fn fetch_all(&self, universe: Vec<String>) -> Vec<(String, Result<Vec<Candle>, ScanError>)> {
        let market = self.market.as_ref();
        let settings = &self.settings;

        let mut results: Vec<(usize, String, Result<Vec<Candle>, ScanError>)> =
            stream::iter(universe.into_iter().enumerate())
                .map(|(idx, symbol)| async move {
                    let result = tokio::time::timeout(
                        settings.fetch_timeout,
                        market.fetch_candles(&symbol, settings.timeframe, settings.kline_limit),
                    )
                    .await
                    .map_err(|_| ScanError::Timeout(settings.fetch_timeout))
                    .and_then(|r| r.map_err(ScanError::from));
                    (idx, symbol, result)
                })
                .buffer_unordered(settings.batch_size)
                .collect()
                .await;

        results.sort_by_key(|(idx, _, _)| *idx);
        results
            .into_iter()
            .map(|(_, symbol, result)| (symbol, result))
            .collect()
    }

    /// COMPUTE -> SCORE -> CONFIRM -> GATE for one symbol.
    ///
    /// The confirmation fetch gets the same per-fetch timeout as FETCH and is
    /// abandoned on cancellation.
    async fn process_symbol(
        &self,
        symbol: &str,
        candles: &[Candle],
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) {
        let snapshot = match compute_snapshot(candles) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(symbol, error = %e, "ORCHESTRATOR: insufficient data, retry next cycle");
                report.insufficient += 1;
                return;
            }
        };

        let (category, config) = self.resolver.resolve(symbol);
        let Some(candidate) = scoring::evaluate(
            symbol,
            self.settings.timeframe,
            category,
            &config,
            &snapshot,
        ) else {
            debug!(symbol, "ORCHESTRATOR: no signal");
            return;
        };
        report.candidates += 1;

        let fetch_timeout = self.settings.fetch_timeout;
        let confirmation = tokio::select! {
            _ = cancel.cancelled() => {
                report.cancelled = true;
                return;
            }
            result = tokio::time::timeout(
                fetch_timeout,
                confirm(self.market.as_ref(), &candidate, &config),
            ) => match result {
                Ok(confirmation) => confirmation,
                Err(_) => Confirmation::Unavailable {
                    timeframe: config
                        .confirmation_timeframe(candidate.timeframe)
                        .unwrap_or(candidate.timeframe),
                    reason: format!("confirmation fetch timed out after {fetch_timeout:?}"),
                },
            },
        };
        if !confirmation.is_accepted() {
            debug!(symbol, ?confirmation, "ORCHESTRATOR: candidate not confirmed");
            report.unconfirmed += 1;
            return;
        }

        match self.gate.accept(&candidate, config.signal_ttl).await {
            Ok(GateOutcome::Emitted(_)) => report.emitted += 1,
            Ok(GateOutcome::Suppressed { .. }) => report.suppressed += 1,
            Err(e) => {
                warn!(symbol, error = %e, "ORCHESTRATOR: failed to persist signal");
                report.failed += 1;
            }
        }
    }
}
