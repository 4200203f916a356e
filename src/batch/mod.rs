//! Bounded-concurrency batch recognition.
//!
//! Missing inputs are recorded as failures before any backend call. The rest
//! run through a shared [`ResilientBackend`] with at most `concurrency` calls
//! in flight. Results arrive in completion order; each carries its path so
//! callers can restore page order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BatchSettings;
use crate::models::RecognizedWord;
use crate::ocr::{BackendKind, OcrError, RecognitionBackend};
use crate::resilience::ResilientBackend;

/// Failure reason recorded for inputs that do not exist.
pub const NOT_FOUND_REASON: &str = "not found";

/// Progress callback: `(completed, total, current_path)`.
pub type ProgressCallback<'a> = dyn Fn(usize, usize, &Path) + Send + Sync + 'a;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch aborted at {path}: {source}")]
    Aborted {
        path: PathBuf,
        #[source]
        source: OcrError,
    },
}

/// Batch options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum recognition calls in flight.
    pub concurrency: usize,
    /// Record per-item failures and keep going instead of aborting.
    pub continue_on_error: bool,
    /// Per-item retry budget; `None` uses the backend's policy.
    pub max_retries: Option<u32>,
    /// Request word geometry when the backend supports it.
    pub with_geometry: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            continue_on_error: true,
            max_retries: None,
            with_geometry: false,
        }
    }
}

impl From<&BatchSettings> for BatchOptions {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            continue_on_error: settings.continue_on_error,
            ..Default::default()
        }
    }
}

/// One recognized input.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub path: PathBuf,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<RecognizedWord>>,
    pub backend: BackendKind,
    pub processing_time_ms: u64,
}

/// One input that could not be recognized.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub error: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub avg_time_per_item: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub results: Vec<BatchItem>,
    pub failures: Vec<BatchFailure>,
    pub stats: BatchStats,
}

/// Fans recognition out over many images.
pub struct BatchOrchestrator {
    backend: Arc<ResilientBackend>,
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(backend: Arc<ResilientBackend>, options: BatchOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub async fn run(&self, paths: &[PathBuf]) -> Result<BatchResult, BatchError> {
        self.run_with_progress(paths, None).await
    }

    pub async fn run_with_progress(
        &self,
        paths: &[PathBuf],
        progress: Option<&ProgressCallback<'_>>,
    ) -> Result<BatchResult, BatchError> {
        let start = Instant::now();
        let total = paths.len();
        let mut result = BatchResult::default();
        let mut completed = 0usize;

        let (existing, missing): (Vec<&PathBuf>, Vec<&PathBuf>) =
            paths.iter().partition(|p| p.is_file());

        for path in missing {
            warn!("Skipping missing input {}", path.display());
            result.failures.push(BatchFailure {
                path: path.clone(),
                error: NOT_FOUND_REASON.to_string(),
                category: "invalid_input".to_string(),
            });
            completed += 1;
            if let Some(cb) = progress {
                cb(completed, total, path);
            }
        }

        let with_geometry =
            self.options.with_geometry && self.backend.capabilities().supports_geometry;
        let max_retries = self
            .options
            .max_retries
            .unwrap_or(self.backend.policy().max_retries);
        let concurrency = self.options.concurrency.max(1);

        info!(
            "Recognizing {} images with {} (concurrency {})",
            existing.len(),
            self.backend.kind(),
            concurrency
        );

        let mut in_flight = stream::iter(existing.into_iter().map(|path| async move {
            let outcome = self
                .backend
                .call_with_retries(path, with_geometry, max_retries)
                .await;
            (path, outcome)
        }))
        .buffer_unordered(concurrency);

        while let Some((path, outcome)) = in_flight.next().await {
            completed += 1;
            match outcome {
                Ok(ocr) => {
                    debug!("Recognized {} ({} chars)", path.display(), ocr.text.len());
                    result.results.push(BatchItem {
                        path: path.clone(),
                        text: ocr.text,
                        words: ocr.words,
                        backend: ocr.backend,
                        processing_time_ms: ocr.processing_time_ms,
                    });
                }
                Err(err) => {
                    if !self.options.continue_on_error {
                        return Err(BatchError::Aborted {
                            path: path.clone(),
                            source: err,
                        });
                    }
                    warn!("Recognition failed for {}: {}", path.display(), err);
                    result.failures.push(BatchFailure {
                        path: path.clone(),
                        error: err.to_string(),
                        category: err.category().to_string(),
                    });
                }
            }
            if let Some(cb) = progress {
                cb(completed, total, path);
            }
        }

        let total_time = start.elapsed();
        result.stats = BatchStats {
            total,
            successful: result.results.len(),
            failed: result.failures.len(),
            total_time,
            avg_time_per_item: average(total_time, total),
        };
        Ok(result)
    }
}

fn average(total_time: Duration, count: usize) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total_time.div_f64(count as f64)
    }
}
