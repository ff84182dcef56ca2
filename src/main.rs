use anyhow::{Context, Result};
use signal_scanner::config::load_config;
use signal_scanner::expiry::run_expiry_sweep;
use signal_scanner::logging::{init_tracing, spawn_signal_log};
use signal_scanner::symbol_scanner::SymbolScanner;
use signal_scanner::trending::MarketResolver;
use signal_scanner::{
    EventBus, MarketDataClient, Orchestrator, OrchestratorSettings, SignalGate, SignalStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = load_config()?;
    info!(
        base_url = %cfg.binance.base_url,
        timeframe = %cfg.scanner.timeframe,
        universe_size = cfg.scanner.universe_size,
        batch_size = cfg.scanner.batch_size,
        poll_interval_secs = cfg.scanner.poll_interval_secs,
        db_path = %cfg.storage.db_path.display(),
        "configuration loaded"
    );

    let client = MarketDataClient::new(&cfg.binance, cfg.retry_policy())
        .context("failed to build market data client")?;
    let store = SignalStore::open(&cfg.storage.db_path).context("failed to open signal store")?;
    let bus = EventBus::new_with_config(&cfg.event_bus);
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    if let Some(path) = cfg.logging.signal_log_path.clone() {
        tasks.push(spawn_signal_log(&bus, path, cancel.clone()));
    }
    if cfg.expiry.enabled {
        tasks.push(tokio::spawn(run_expiry_sweep(
            store.clone(),
            Duration::from_secs(cfg.expiry.sweep_interval_secs.max(1)),
            cancel.clone(),
        )));
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        shutdown.cancel();
    });

    let gate = Arc::new(SignalGate::new(store, bus));
    let mut orchestrator = Orchestrator::new(
        Arc::new(client),
        SymbolScanner::new(&cfg.scanner),
        MarketResolver::new(cfg.markets.clone()),
        gate,
        OrchestratorSettings::from(&cfg),
    );
    orchestrator.run(cancel.clone()).await;

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("signal scanner stopped");
    Ok(())
}
