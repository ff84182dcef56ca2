// LOGGING: tracing setup and the JSON-lines signal log
// The signal log is a plain bus subscriber; it never blocks emission.

use crate::event_bus::EventBus;
use crate::types::Signal;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Initialize the global tracing subscriber (`RUST_LOG` overrides `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_ansi(true)
        .try_init();
}

#[derive(Debug, Serialize)]
#[serde(tag = "event_type")]
pub enum LogEvent<'a> {
    #[serde(rename = "signal_emitted")]
    SignalEmitted {
        timestamp: i64,
        #[serde(flatten)]
        signal: &'a Signal,
    },
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Write one JSON line per signal to `writer`.
pub fn write_signal_line<W: Write>(writer: &mut W, signal: &Signal) -> std::io::Result<()> {
    let event = LogEvent::SignalEmitted {
        timestamp: chrono::Utc::now().timestamp_millis(),
        signal,
    };
    let json = serde_json::to_string(&event)?;
    writeln!(writer, "{json}")?;
    writer.flush()
}

/// Consume emitted signals until the bus closes or `cancel` fires.
pub async fn run_signal_log(
    mut rx: broadcast::Receiver<Signal>,
    path: PathBuf,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut file = open_append(&path)?;
    info!(path = %path.display(), "LOGGING: signal log started");

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };

        match received {
            Ok(signal) => {
                info!(
                    id = %signal.id,
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    timeframe = %signal.timeframe,
                    entry = signal.entry,
                    stop_loss = signal.stop_loss,
                    take_profit = signal.take_profit,
                    confidence = signal.confidence,
                    "LOGGING: signal emitted"
                );
                if let Err(e) = write_signal_line(&mut file, &signal) {
                    warn!(error = %e, "LOGGING: failed to write signal line");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed_events = missed, "LOGGING: signal receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("LOGGING: signal channel closed");
                break;
            }
        }
    }

    let _ = file.flush();
    Ok(())
}

/// Spawn the signal log as a background task.
pub fn spawn_signal_log(
    bus: &EventBus,
    path: PathBuf,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let rx = bus.subscribe_signals();
    tokio::spawn(async move {
        if let Err(e) = run_signal_log(rx, path, cancel).await {
            warn!(error = %e, "LOGGING: signal log stopped");
        }
    })
}
