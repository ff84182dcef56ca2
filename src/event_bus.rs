// Event bus for emitted signals
// The gate publishes after persistence; subscribers (signal log, paper
// trading, notifiers) consume independently and at-least-once.

use crate::config::EventBusCfg;
use crate::types::Signal;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone)]
pub struct EventBus {
    pub signal_tx: broadcast::Sender<Signal>,
}

impl EventBus {
    /// Create a new EventBus with the configured buffer size.
    pub fn new_with_config(cfg: &EventBusCfg) -> Self {
        let (signal_tx, _) = broadcast::channel(cfg.signal_buffer.max(1));
        Self { signal_tx }
    }

    pub fn new() -> Self {
        Self::new_with_config(&EventBusCfg::default())
    }

    /// Each call creates a new independent receiver.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }

    /// Publish to every current subscriber. Returns the number reached.
    ///
    /// Having no subscribers is not an error: the signal is already persisted.
    pub fn publish_signal(&self, signal: Signal) -> usize {
        match self.signal_tx.send(signal) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(signal)) => {
                debug!(id = %signal.id, "EVENT_BUS: no signal subscribers");
                0
            }
        }
    }

    pub fn signal_receivers(&self) -> usize {
        self.signal_tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MarketCategory, SignalStatus, Timeframe};
    use chrono::Utc;

    fn signal() -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig".into(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            timeframe: Timeframe::H1,
            entry: 100.0,
            stop_loss: 97.0,
            take_profit: 106.0,
            atr: 2.0,
            sl_multiplier: 1.5,
            tp_multiplier: 3.0,
            confidence: 0.75,
            description: String::new(),
            market_type: MarketCategory::Major,
            status: SignalStatus::Active,
            candle_time: now,
            created_at: now,
            expires_at: now,
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish_signal(signal()), 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_signals();
        let mut b = bus.subscribe_signals();

        assert_eq!(bus.publish_signal(signal()), 2);
        assert_eq!(a.recv().await.unwrap().id, "sig");
        assert_eq!(b.recv().await.unwrap().id, "sig");
    }
}
