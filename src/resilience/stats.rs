//! Per-backend request statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Running counters for one resilient backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls that needed more than one attempt.
    pub retried_requests: u64,
    /// Calls that needed at least one retry.
    pub total_retries: u64,
    /// Extra attempts across all calls.
    pub retry_attempts: u64,
    pub total_latency_ms: u64,
    /// Failed attempts by error category.
    pub error_categories: BTreeMap<String, u64>,
}

impl BackendStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_requests as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub(crate) fn record_call(
        &mut self,
        succeeded: bool,
        retries: u32,
        latency: Duration,
        categories: &[&'static str],
    ) {
        self.total_requests += 1;
        if succeeded {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        if retries > 0 {
            self.retried_requests += 1;
            self.total_retries += 1;
            self.retry_attempts += u64::from(retries);
        }
        self.total_latency_ms += latency.as_millis() as u64;
        for category in categories {
            *self.error_categories.entry(category.to_string()).or_insert(0) += 1;
        }
    }
}
