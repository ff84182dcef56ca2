// Deduplication & persistence gate
// Candidate -> Signal(ACTIVE) -> broadcast, at most one ACTIVE per key.

use crate::error::StoreError;
use crate::event_bus::EventBus;
use crate::storage::{InsertOutcome, SignalStore};
use crate::types::{Candidate, Signal, SignalKey, SignalStatus};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Emitted(Signal),
    /// An ACTIVE signal already holds the key
    Suppressed { existing_id: String },
}

pub struct SignalGate {
    store: SignalStore,
    bus: EventBus,
    /// Serializes check-and-insert per (symbol, direction, timeframe)
    key_locks: DashMap<SignalKey, Arc<Mutex<()>>>,
}

impl SignalGate {
    pub fn new(store: SignalStore, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            key_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    /// Persist `candidate` as an ACTIVE signal and broadcast it, unless the
    /// key already has one. Safe to call again for the same candidate.
    pub async fn accept(
        &self,
        candidate: &Candidate,
        ttl: Duration,
    ) -> Result<GateOutcome, StoreError> {
        let key = candidate.key();
        let key_lock = self.key_locks.entry(key.clone()).or_default().clone();
        let outcome = {
            let _guard = key_lock.lock().await;
            self.persist_and_publish(candidate, ttl, &key).await
        };

        // Only the map still holds the lock once no other accept is waiting on the key.
        drop(key_lock);
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    /// Keys with a lock entry, i.e. with an accept in flight.
    pub fn locked_keys(&self) -> usize {
        self.key_locks.len()
    }

    async fn persist_and_publish(
        &self,
        candidate: &Candidate,
        ttl: Duration,
        key: &SignalKey,
    ) -> Result<GateOutcome, StoreError> {
        let signal = build_signal(candidate, ttl, Utc::now());
        match self.store.insert_if_absent(&signal).await? {
            InsertOutcome::Duplicate(existing_id) => {
                debug!(
                    symbol = %key.symbol,
                    direction = %key.direction,
                    timeframe = %key.timeframe,
                    existing_id = %existing_id,
                    "GATE: active signal exists, candidate suppressed"
                );
                Ok(GateOutcome::Suppressed { existing_id })
            }
            InsertOutcome::Inserted => {
                let receivers = self.bus.publish_signal(signal.clone());
                info!(
                    id = %signal.id,
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    timeframe = %signal.timeframe,
                    confidence = signal.confidence,
                    receivers,
                    "GATE: signal emitted"
                );
                Ok(GateOutcome::Emitted(signal))
            }
        }
    }
}

/// Build the persisted payload for a candidate.
///
/// Timestamps are truncated to milliseconds, the storage resolution.
pub fn build_signal(candidate: &Candidate, ttl: Duration, now: DateTime<Utc>) -> Signal {
    let now = now.trunc_subsecs(3);
    Signal {
        id: Uuid::new_v4().to_string(),
        symbol: candidate.symbol.clone(),
        direction: candidate.direction,
        timeframe: candidate.timeframe,
        entry: candidate.entry,
        stop_loss: candidate.stop_loss,
        take_profit: candidate.take_profit,
        atr: candidate.atr,
        sl_multiplier: candidate.sl_multiplier,
        tp_multiplier: candidate.tp_multiplier,
        confidence: candidate.confidence,
        description: candidate.rationale.clone(),
        market_type: candidate.market_category,
        status: SignalStatus::Active,
        candle_time: candidate.timestamp,
        created_at: now,
        expires_at: now + ttl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MarketCategory, Timeframe};
    use chrono::TimeZone;

    #[test]
    fn built_signal_carries_candidate_levels_and_horizon() {
        let candidate = Candidate {
            symbol: "DOGEUSDT".into(),
            direction: Direction::Short,
            timeframe: Timeframe::M15,
            market_category: MarketCategory::Meme,
            entry: 0.1,
            stop_loss: 0.105,
            take_profit: 0.09,
            atr: 0.002,
            sl_multiplier: 2.5,
            tp_multiplier: 5.0,
            confidence: 0.75,
            contributing_rules: vec!["volume_surge"],
            rationale: "SHORT 6.0/8.0 (75%): volume_surge".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap(),
        };
        let now = Utc.timestamp_millis_opt(1_714_558_512_345).unwrap()
            + Duration::nanoseconds(678_901);

        let signal = build_signal(&candidate, Duration::hours(6), now);

        assert_eq!(signal.status, SignalStatus::Active);
        assert_eq!(signal.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(signal.expires_at - signal.created_at, Duration::hours(6));
        assert_eq!(signal.stop_loss, candidate.stop_loss);
        assert_eq!(signal.description, candidate.rationale);
        assert_eq!(signal.market_type, MarketCategory::Meme);
        assert_eq!(signal.key(), candidate.key());
    }
}
