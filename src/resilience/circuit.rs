//! Circuit breaker state machine.
//!
//! Transitions: CLOSED -> OPEN once `failure_threshold` consecutive failures
//! are recorded, OPEN -> HALF_OPEN when the cooldown has elapsed, then
//! HALF_OPEN -> CLOSED on a successful probe or back to OPEN on a failed one.
//! While HALF_OPEN only one probe is admitted at a time.
//!
//! The breaker takes `now` as an argument and owns no clock.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        })
    }
}

/// Point-in-time copy of the breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_time: Option<Instant>,
}

/// Result of asking the breaker whether a call may go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call normally.
    Allowed,
    /// This call is the single HALF_OPEN probe.
    Probe,
    /// Fail fast without calling the backend.
    Rejected { retry_in: Duration },
}

/// Transition reported back to the caller for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Opened,
    Reopened,
    Closed,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    status: CircuitStatus,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            status: CircuitStatus::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            probe_in_flight: false,
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState {
            status: self.status,
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
        }
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.status {
            CircuitStatus::Closed => Admission::Allowed,
            CircuitStatus::Open => {
                let next = self.next_attempt_time.unwrap_or(now);
                if now >= next {
                    self.status = CircuitStatus::HalfOpen;
                    self.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_in: next - now,
                    }
                }
            }
            CircuitStatus::HalfOpen => {
                if self.probe_in_flight {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub fn record_success(&mut self) -> Transition {
        self.failure_count = 0;
        self.probe_in_flight = false;
        if self.status == CircuitStatus::HalfOpen {
            self.status = CircuitStatus::Closed;
            self.next_attempt_time = None;
            Transition::Closed
        } else {
            Transition::None
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> Transition {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        match self.status {
            CircuitStatus::HalfOpen => {
                self.open(now);
                Transition::Reopened
            }
            CircuitStatus::Closed if self.failure_count >= self.config.failure_threshold => {
                self.open(now);
                Transition::Opened
            }
            _ => Transition::None,
        }
    }

    /// The admitted call ended without a verdict on backend health.
    pub fn release(&mut self) {
        self.probe_in_flight = false;
    }

    fn open(&mut self, now: Instant) {
        self.status = CircuitStatus::Open;
        self.probe_in_flight = false;
        self.next_attempt_time = Some(now + self.config.cooldown);
    }
}
