//! Scripted recognition backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use pagescribe::models::{BoundingBox, RecognizedWord};
use pagescribe::ocr::{
    BackendCapabilities, BackendKind, FailureKind, OcrError, OcrResult, RecognitionBackend,
};

/// Answers with the file stem, failing as scripted.
pub struct Scripted {
    /// Calls that fail before the backend starts answering.
    failures_remaining: AtomicUsize,
    failure_kind: FailureKind,
    /// File stems that always fail.
    failing_stems: Mutex<HashSet<String>>,
    delay: Duration,
    geometry: bool,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<PathBuf>>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Scripted {
    pub fn echo() -> Self {
        Self {
            failures_remaining: AtomicUsize::new(0),
            failure_kind: FailureKind::Transient,
            failing_stems: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
            geometry: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Fail every call with `kind`.
    pub fn failing(kind: FailureKind) -> Self {
        Self::echo().fail_first(usize::MAX, kind)
    }

    /// Fail the first `n` calls with `kind`, then answer.
    pub fn fail_first(self, n: usize, kind: FailureKind) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        Self {
            failure_kind: kind,
            ..self
        }
    }

    pub fn failing_on(self, stems: &[&str]) -> Self {
        self.failing_stems
            .lock()
            .unwrap()
            .extend(stems.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn with_geometry(self) -> Self {
        Self {
            geometry: true,
            ..self
        }
    }

    /// Start answering every call.
    pub fn recover(&self) {
        self.failures_remaining.store(0, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, image_path: &Path) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(image_path.to_path_buf());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing_stems.lock().unwrap().contains(&stem) {
            return Err(OcrError::failed(FailureKind::Parse, format!("unreadable {}", stem)));
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(OcrError::failed(self.failure_kind, "scripted failure"));
        }
        Ok(format!("text of {}", stem))
    }
}

#[async_trait]
impl RecognitionBackend for Scripted {
    fn kind(&self) -> BackendKind {
        BackendKind::Tesseract
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_geometry: self.geometry,
            is_free: true,
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn availability_hint(&self) -> String {
        "scripted".to_string()
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let text = self.answer(image_path).await?;
        Ok(OcrResult {
            text,
            words: None,
            backend: BackendKind::Tesseract,
            model: None,
            processing_time_ms: 1,
        })
    }

    async fn recognize_with_geometry(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let text = self.answer(image_path).await?;
        let words = text
            .split_whitespace()
            .enumerate()
            .filter_map(|(i, w)| {
                let x = i as u32 * 60;
                Some(RecognizedWord {
                    text: w.to_string(),
                    bbox: BoundingBox::new(x, 10, x + 50, 30)?,
                    confidence: Some(90.0),
                })
            })
            .collect::<Vec<_>>();
        Ok(OcrResult {
            text,
            words: Some(words),
            backend: BackendKind::Tesseract,
            model: None,
            processing_time_ms: 1,
        })
    }
}

/// Write placeholder page images named `page-<n>.png` for `1..=count`.
pub fn write_pages(dir: &Path, count: u32) -> Vec<PathBuf> {
    (1..=count)
        .map(|n| {
            let path = dir.join(format!("page-{}.png", n));
            std::fs::write(&path, b"png").unwrap();
            path
        })
        .collect()
}
