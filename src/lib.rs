// Library crate: market scanner that turns candles into deduplicated signals
// Re-exports the modules used by the binary and integration tests

pub mod config;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod expiry;
pub mod logging;
pub mod orchestrator;
pub mod signal_gate;
pub mod storage;
pub mod symbol_scanner;
pub mod trending;
pub mod types;

pub use connection::{MarketData, MarketDataClient};
pub use error::{ClientError, IndicatorError, ScanError, StoreError};
pub use event_bus::EventBus;
pub use orchestrator::{CycleReport, Orchestrator, OrchestratorSettings};
pub use signal_gate::{GateOutcome, SignalGate};
pub use storage::SignalStore;
