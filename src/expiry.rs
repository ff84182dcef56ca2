// Periodic sweep moving stale ACTIVE signals to EXPIRED

use crate::storage::SignalStore;
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run_expiry_sweep(store: SignalStore, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "EXPIRY: sweep started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.expire_stale(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "EXPIRY: signals expired"),
            Err(e) => warn!(error = %e, "EXPIRY: sweep failed"),
        }
    }
    info!("EXPIRY: sweep stopped");
}
