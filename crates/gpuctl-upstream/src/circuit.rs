//! Per-process circuit breaker for the upstream client (spec §4.2, §5).
//!
//! Shaped like `claw-health`'s `FailoverStateMachine`: an
//! enum carries the state's own data, and a `record_*` method mutates
//! `&mut self.state` and returns a small transition/decision enum rather
//! than leaking a boolean.

use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// What the caller should do for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Allow,
    Reject,
}

pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    trip_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(trip_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trip_threshold,
            cooldown,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Call before issuing a request. `HalfOpen` allows exactly one trial
    /// request through; further calls are rejected until that trial
    /// resolves via `record_success`/`record_failure`. Fail-fast rather than
    /// queue-and-wait (spec §4.2 describes the latter; scoped out here).
    pub fn poll(&mut self) -> CircuitDecision {
        match self.state {
            CircuitState::Closed => CircuitDecision::Allow,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    info!("circuit breaker cooldown elapsed, entering half-open");
                    CircuitDecision::Allow
                } else {
                    CircuitDecision::Reject
                }
            }
            CircuitState::HalfOpen => CircuitDecision::Reject,
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            info!("trial request succeeded, closing circuit breaker");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                warn!("trial request failed, reopening circuit breaker");
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.trip_threshold {
                    warn!(failures = self.consecutive_failures, "circuit breaker tripped");
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}
