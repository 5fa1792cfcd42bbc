//! Circuit breaker shared by the HTTP provider clients.
//!
//! HTTP 403 trips the breaker at once. Other failures count toward an
//! optional threshold of consecutive failures; a breaker built with
//! [`CircuitBreaker::forbidden_only`] ignores them, so a short run of server
//! errors never blocks the requests that follow. While open, clients refuse
//! to send requests until the cooldown (default 30 minutes) has elapsed.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Cooldown after a trip.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed.
    Closed,
    /// Requests are refused until the cooldown expires.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Fail-fast guard in front of an upstream provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    /// `None`: only [`CircuitBreaker::trip`] opens the breaker.
    failure_threshold: Option<u32>,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: Some(failure_threshold.max(1)),
        }
    }

    /// Opens only on an explicit trip (HTTP 403).
    pub fn forbidden_only(cooldown: Duration) -> Self {
        Self {
            failure_threshold: None,
            ..Self::new(cooldown, 1)
        }
    }

    /// 30-minute cooldown, trips after 3 consecutive failures.
    pub fn default_provider() -> Self {
        Self::new(DEFAULT_COOLDOWN, 3)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds plain fields; a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check if requests are currently allowed, closing an expired breaker.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let Some(threshold) = self.failure_threshold else {
            return;
        };
        if inner.consecutive_failures >= threshold && inner.state == BreakerState::Closed {
            warn!(
                failures = inner.consecutive_failures,
                "provider failing repeatedly; circuit breaker open"
            );
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    /// Immediately open the breaker (403 Forbidden / IP ban).
    pub fn trip(&self) {
        warn!("provider refused access; circuit breaker open");
        self.lock().state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Remaining cooldown time (zero if closed).
    pub fn remaining_cooldown(&self) -> Duration {
        match self.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}
