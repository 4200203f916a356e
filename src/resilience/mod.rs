//! Retry and circuit breaker wrapper for recognition backends.
//!
//! [`ResilientBackend`] owns one [`CircuitBreaker`] and one [`BackendStats`]
//! behind a single mutex. The lock is held only for state transitions and
//! never across an await; the backend call and backoff sleeps run unlocked,
//! so one wrapper can be shared by many concurrent batch workers.

mod circuit;
mod retry;
mod stats;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ResilienceSettings;
use crate::ocr::{BackendCapabilities, BackendKind, OcrError, OcrResult, RecognitionBackend};

pub use circuit::{
    Admission, BreakerConfig, CircuitBreaker, CircuitState, CircuitStatus, Transition,
};
pub use retry::{backoff_delay, RetryPolicy};
pub use stats::BackendStats;

struct Guarded {
    breaker: CircuitBreaker,
    stats: BackendStats,
}

fn lock(guarded: &Mutex<Guarded>) -> MutexGuard<'_, Guarded> {
    guarded.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Half-open admission that has not reported back yet.
///
/// Dropping it unsettled (the call was cancelled mid-flight) hands the slot
/// back to the breaker so the next caller can try.
struct HalfOpenSlot<'a> {
    guarded: &'a Mutex<Guarded>,
    armed: bool,
}

impl HalfOpenSlot<'_> {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for HalfOpenSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.guarded).breaker.release();
        }
    }
}

/// A recognition backend wrapped with retry and a circuit breaker.
pub struct ResilientBackend {
    inner: Arc<dyn RecognitionBackend>,
    policy: RetryPolicy,
    guarded: Mutex<Guarded>,
}

impl ResilientBackend {
    pub fn new(
        inner: Arc<dyn RecognitionBackend>,
        policy: RetryPolicy,
        breaker: BreakerConfig,
    ) -> Self {
        Self {
            inner,
            policy,
            guarded: Mutex::new(Guarded {
                breaker: CircuitBreaker::new(breaker),
                stats: BackendStats::default(),
            }),
        }
    }

    pub fn from_settings(inner: Arc<dyn RecognitionBackend>, settings: &ResilienceSettings) -> Self {
        Self::new(inner, settings.retry_policy(), settings.breaker_config())
    }

    pub fn inner(&self) -> &Arc<dyn RecognitionBackend> {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Snapshot of the request counters.
    pub async fn stats(&self) -> BackendStats {
        lock(&self.guarded).stats.clone()
    }

    /// Snapshot of the circuit state.
    pub async fn circuit(&self) -> CircuitState {
        lock(&self.guarded).breaker.state()
    }

    /// Run one call with the configured retry budget.
    pub async fn call(&self, image_path: &Path, with_geometry: bool) -> Result<OcrResult, OcrError> {
        self.call_with_retries(image_path, with_geometry, self.policy.max_retries)
            .await
    }

    /// Run one call with an explicit retry budget.
    pub async fn call_with_retries(
        &self,
        image_path: &Path,
        with_geometry: bool,
        max_retries: u32,
    ) -> Result<OcrResult, OcrError> {
        let kind = self.inner.kind();
        let start = Instant::now();
        let mut retries = 0u32;
        let mut categories: Vec<&'static str> = Vec::new();
        let mut last_error: Option<OcrError> = None;

        let outcome = loop {
            let admission = lock(&self.guarded).breaker.admit(Instant::now());
            match admission {
                Admission::Rejected { retry_in } => {
                    let err = match last_error.take() {
                        // Circuit opened while this call was retrying
                        Some(err) => err,
                        None => {
                            categories.push("circuit_open");
                            OcrError::CircuitOpen {
                                backend: kind,
                                retry_in,
                            }
                        }
                    };
                    break Err(err);
                }
                Admission::Probe => info!("{} circuit half-open, sending probe", kind),
                Admission::Allowed => {}
            }
            let slot = HalfOpenSlot {
                guarded: &self.guarded,
                armed: admission == Admission::Probe,
            };

            let result = if with_geometry {
                self.inner.recognize_with_geometry(image_path).await
            } else {
                self.inner.recognize(image_path).await
            };
            slot.settle();

            let err = {
                let mut guarded = lock(&self.guarded);
                match result {
                    Ok(result) => {
                        if guarded.breaker.record_success() == Transition::Closed {
                            info!("{} circuit closed after successful probe", kind);
                        }
                        break Ok(result);
                    }
                    Err(err) => {
                        categories.push(err.category());
                        if err.counts_toward_circuit() {
                            match guarded.breaker.record_failure(Instant::now()) {
                                Transition::Opened => warn!(
                                    "{} circuit opened after {} consecutive failures",
                                    kind,
                                    guarded.breaker.config().failure_threshold
                                ),
                                Transition::Reopened => {
                                    warn!("{} probe failed, circuit re-opened", kind)
                                }
                                _ => {}
                            }
                        } else {
                            guarded.breaker.release();
                        }
                        err
                    }
                }
            };

            if !err.is_retryable() || retries >= max_retries {
                break Err(err);
            }

            let delay = self.policy.delay_for(retries);
            retries += 1;
            debug!(
                "{} failed on {} ({}), retry {}/{} in {:?}",
                kind,
                image_path.display(),
                err,
                retries,
                max_retries,
                delay
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        };

        lock(&self.guarded).stats.record_call(
            outcome.is_ok(),
            retries,
            start.elapsed(),
            &categories,
        );
        outcome
    }
}

#[async_trait]
impl RecognitionBackend for ResilientBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn availability_hint(&self) -> String {
        self.inner.availability_hint()
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        self.call(image_path, false).await
    }

    async fn recognize_with_geometry(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        self.call(image_path, true).await
    }

    fn estimate_cost(&self, page_count: usize) -> f64 {
        self.inner.estimate_cost(page_count)
    }
}
