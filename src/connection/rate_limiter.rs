// Request-weight budget and ban gate for the exchange REST API

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const WEIGHT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Rate Limiter
// ============================================================================

/// Sliding one-minute weight budget mirroring the exchange's
/// `REQUEST_WEIGHT` limit, plus the IP-ban cooldown gate.
///
/// Requests that do not fit the budget wait for the oldest entry to leave the
/// window; they are never dropped. The locks are never held across an await.
pub struct RateLimiter {
    /// (issued_at, weight) for every request in the last minute
    weights: Mutex<VecDeque<(Instant, u32)>>,
    /// Budget after the safety factor is applied
    max_weight_per_minute: u32,
    ban: Mutex<Option<BanState>>,
}

#[derive(Debug, Clone, Copy)]
struct BanState {
    until: Instant,
    until_utc: DateTime<Utc>,
}

impl RateLimiter {
    /// # Arguments
    /// * `max_weight_per_minute` - Published exchange limit (futures: 2400)
    /// * `safety_factor` - Share of the published limit to use, clamped to [0.1, 1.0]
    pub fn new(max_weight_per_minute: u32, safety_factor: f64) -> Self {
        let safety_factor = safety_factor.clamp(0.1, 1.0);
        let safe_weight = ((max_weight_per_minute as f64) * safety_factor).floor() as u32;

        Self {
            weights: Mutex::new(VecDeque::new()),
            max_weight_per_minute: safe_weight.max(1),
            ban: Mutex::new(None),
        }
    }

    pub fn max_weight_per_minute(&self) -> u32 {
        self.max_weight_per_minute
    }

    /// Wait until `weight` fits the budget, then record it.
    pub async fn acquire(&self, weight: u32) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut weights = lock(&self.weights);
                prune(&mut weights, now);

                let used: u32 = weights.iter().map(|(_, w)| *w).sum();
                // A single request heavier than the whole budget still goes
                // through once the window is empty.
                if used + weight <= self.max_weight_per_minute || weights.is_empty() {
                    weights.push_back((now, weight));
                    return;
                }

                weights
                    .front()
                    .map(|(oldest, _)| (*oldest + WEIGHT_WINDOW).saturating_duration_since(now))
                    .unwrap_or_default()
            };

            debug!(
                weight,
                wait_ms = wait.as_millis() as u64,
                "RATE_LIMITER: weight budget exhausted, queueing request"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Raise local accounting to the exchange-reported `X-MBX-USED-WEIGHT-1M`.
    pub fn reconcile(&self, exchange_used_weight: u32) {
        let now = Instant::now();
        let mut weights = lock(&self.weights);
        prune(&mut weights, now);

        let used: u32 = weights.iter().map(|(_, w)| *w).sum();
        if exchange_used_weight > used {
            weights.push_back((now, exchange_used_weight - used));
        }
    }

    /// Weight consumed in the current window.
    pub fn used_weight(&self) -> u32 {
        let now = Instant::now();
        let mut weights = lock(&self.weights);
        prune(&mut weights, now);
        weights.iter().map(|(_, w)| *w).sum()
    }

    /// Enter (or extend) the ban cooldown. Returns the effective end time.
    pub fn enter_ban(&self, cooldown: Duration) -> DateTime<Utc> {
        let until = Instant::now() + cooldown;
        let until_utc = Utc::now()
            + chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());

        let mut ban = lock(&self.ban);
        match *ban {
            Some(existing) if existing.until >= until => existing.until_utc,
            _ => {
                warn!(
                    cooldown_secs = cooldown.as_secs(),
                    until = %until_utc,
                    "RATE_LIMITER: entering ban cooldown"
                );
                *ban = Some(BanState { until, until_utc });
                until_utc
            }
        }
    }

    /// Remaining ban cooldown, `None` when calls are allowed.
    pub fn ban_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut ban = lock(&self.ban);
        match *ban {
            Some(state) if state.until > now => Some(state.until - now),
            Some(_) => {
                *ban = None;
                None
            }
            None => None,
        }
    }

    pub fn banned_until(&self) -> Option<DateTime<Utc>> {
        self.ban_remaining()?;
        lock(&self.ban).map(|state| state.until_utc)
    }

    pub fn is_banned(&self) -> bool {
        self.ban_remaining().is_some()
    }
}

fn prune(weights: &mut VecDeque<(Instant, u32)>, now: Instant) {
    while weights
        .front()
        .map_or(false, |(t, _)| now.saturating_duration_since(*t) >= WEIGHT_WINDOW)
    {
        weights.pop_front();
    }
}

// A poisoned lock only means another task panicked mid-update; the queue is
// still structurally valid.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
