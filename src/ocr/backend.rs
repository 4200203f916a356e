//! Recognition backend abstraction.
//!
//! Every engine sits behind [`RecognitionBackend`]. Callers select placement
//! mode and cost handling from [`BackendCapabilities`] instead of inspecting
//! concrete types:
//! - Native: platform recognizer via helper executable (free, plain text)
//! - Tesseract: open engine, plain text or hOCR word geometry (free)
//! - Hosted: Gemini vision model over HTTPS (paid, plain text)
//! - Ollama: locally hosted vision model (free, plain text)

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RecognizedWord;

/// Why a recognition call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, connection resets, 5xx, non-zero exit codes.
    Transient,
    /// Throttled by the service; retry after backing off.
    RateLimited,
    /// Credentials rejected. Fatal.
    Auth,
    /// Billing or quota exhausted. Fatal.
    Quota,
    /// Model declined to transcribe the image.
    Refusal,
    /// Backend answered but the payload could not be interpreted.
    Parse,
}

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unauthori[sz]ed|invalid[ _-]?api[ _-]?key|api key not valid|permission[ _-]denied|forbidden|authentication",
    )
    .unwrap()
});

static QUOTA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)quota|billing|insufficient[ _-]?(credit|funds|balance)|resource[ _-]exhausted")
        .unwrap()
});

static RATE_LIMIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rate[ _-]?limit|too many requests").unwrap());

impl FailureKind {
    /// Auth and quota failures never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Auth | FailureKind::Quota)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Auth => "auth",
            FailureKind::Quota => "quota",
            FailureKind::Refusal => "refusal",
            FailureKind::Parse => "parse",
        }
    }

    /// Classify from free-form error text.
    ///
    /// Only used when the backend gives no status code or error code.
    pub fn from_message(message: &str) -> Self {
        if QUOTA_PATTERN.is_match(message) {
            FailureKind::Quota
        } else if AUTH_PATTERN.is_match(message) {
            FailureKind::Auth
        } else if RATE_LIMIT_PATTERN.is_match(message) {
            FailureKind::RateLimited
        } else {
            FailureKind::Transient
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from recognition backends and the layers wrapping them.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Recognition failed ({kind}): {message}")]
    RecognitionFailed { kind: FailureKind, message: String },

    #[error("Circuit open for {backend}, next attempt in {retry_in:?}")]
    CircuitOpen {
        backend: BackendKind,
        retry_in: Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        OcrError::RecognitionFailed {
            kind,
            message: message.into(),
        }
    }

    /// Failure classified from its message text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        OcrError::RecognitionFailed {
            kind: FailureKind::from_message(&message),
            message,
        }
    }

    /// Whether the resilience layer may try the same call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            OcrError::RecognitionFailed { kind, .. } => kind.is_retryable(),
            OcrError::Io(_) => true,
            OcrError::BackendUnavailable(_)
            | OcrError::InvalidInput(_)
            | OcrError::CircuitOpen { .. } => false,
        }
    }

    /// Whether this failure says something about the backend's health.
    ///
    /// Bad inputs and fast-fails do not move the circuit breaker.
    pub fn counts_toward_circuit(&self) -> bool {
        !matches!(
            self,
            OcrError::InvalidInput(_) | OcrError::CircuitOpen { .. }
        )
    }

    /// Stable category name used in statistics and failure logs.
    pub fn category(&self) -> &'static str {
        match self {
            OcrError::BackendUnavailable(_) => "backend_unavailable",
            OcrError::InvalidInput(_) => "invalid_input",
            OcrError::RecognitionFailed { kind, .. } => kind.as_str(),
            OcrError::CircuitOpen { .. } => "circuit_open",
            OcrError::Io(_) => "io",
        }
    }
}

/// Result of recognizing one image.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Recognized text. Derived from `words` when geometry was requested.
    pub text: String,
    /// Word boxes, only for geometry-capable backends.
    pub words: Option<Vec<RecognizedWord>>,
    /// Which backend produced this result.
    pub backend: BackendKind,
    /// Which model was used (e.g. "gemini-2.0-flash", "llama3.2-vision").
    pub model: Option<String>,
    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

/// Available backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Platform recognizer (Apple Vision) via helper executable.
    Native,
    /// Tesseract OCR via command line.
    Tesseract,
    /// Hosted multimodal model (Google Gemini).
    Hosted,
    /// Local multimodal model served by Ollama.
    Ollama,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Native,
        BackendKind::Tesseract,
        BackendKind::Hosted,
        BackendKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Tesseract => "tesseract",
            BackendKind::Hosted => "hosted",
            BackendKind::Ollama => "ollama",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "native" | "vision" | "apple" => Some(BackendKind::Native),
            "tesseract" => Some(BackendKind::Tesseract),
            "hosted" | "gemini" => Some(BackendKind::Hosted),
            "ollama" | "local" => Some(BackendKind::Ollama),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static capability flags for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Can return per-word bounding boxes.
    pub supports_geometry: bool,
    /// Costs nothing per page.
    pub is_free: bool,
}

/// Trait for recognition backends.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Get the backend kind.
    fn kind(&self) -> BackendKind;

    /// Capability flags used for placement-mode and cost decisions.
    fn capabilities(&self) -> BackendCapabilities;

    /// Cheap liveness probe. Must not have side effects.
    async fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this backend available.
    fn availability_hint(&self) -> String;

    /// Recognize plain text in an image file.
    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError>;

    /// Recognize text with per-word bounding boxes.
    async fn recognize_with_geometry(&self, _image_path: &Path) -> Result<OcrResult, OcrError> {
        Err(OcrError::BackendUnavailable(format!(
            "{} does not provide word geometry",
            self.kind()
        )))
    }

    /// Estimated monetary cost (USD) of recognizing `page_count` pages.
    fn estimate_cost(&self, _page_count: usize) -> f64 {
        0.0
    }
}

/// Reject image paths that do not point at a readable file.
pub fn ensure_image_exists(image_path: &Path) -> Result<(), OcrError> {
    if image_path.is_file() {
        Ok(())
    } else {
        Err(OcrError::InvalidInput(format!(
            "image not found: {}",
            image_path.display()
        )))
    }
}
