//! Shared infrastructure for HTTP-based backends (hosted and local models).
//!
//! Provides image encoding, the transcription prompt, and mapping of HTTP
//! failures onto [`FailureKind`]. Status codes and structured error codes are
//! consulted first; message patterns are the last resort.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;

use super::backend::{ensure_image_exists, FailureKind, OcrError};

/// Shared transcription prompt for vision model backends.
pub const VISION_OCR_PROMPT: &str = "Transcribe all text on this book page exactly as printed. \
Return only the transcribed text, preserving paragraph breaks. \
Do not summarize, translate, or add commentary.";

/// Prompt with an optional language hint appended.
pub fn transcription_prompt(language: &str) -> String {
    if language.is_empty() || language == "eng" {
        VISION_OCR_PROMPT.to_string()
    } else {
        format!(
            "{} The page language (ISO 639-2) is {}.",
            VISION_OCR_PROMPT, language
        )
    }
}

/// Read an image file and encode it as base64, returning (base64_data, mime_type).
pub async fn encode_image_base64(image_path: &Path) -> Result<(String, &'static str), OcrError> {
    ensure_image_exists(image_path)?;
    let image_bytes = tokio::fs::read(image_path).await?;
    let base64_data = base64::engine::general_purpose::STANDARD.encode(&image_bytes);
    Ok((base64_data, mime_type_for(image_path)))
}

fn mime_type_for(image_path: &Path) -> &'static str {
    match image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Build an HTTP client with the given request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, OcrError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OcrError::BackendUnavailable(format!("Failed to create HTTP client: {}", e)))
}

/// Google-style error envelope: `{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Structured {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Plain(String),
}

/// Map a structured status code string onto a failure kind.
fn kind_from_status_code(code: &str) -> Option<FailureKind> {
    match code {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => Some(FailureKind::Auth),
        "RESOURCE_EXHAUSTED" => None, // rate limit or quota, decided by status/message
        "UNAVAILABLE" | "DEADLINE_EXCEEDED" | "INTERNAL" | "ABORTED" => {
            Some(FailureKind::Transient)
        }
        _ => None,
    }
}

/// Classify a non-success HTTP response.
pub fn classify_http_failure(backend: &str, status: StatusCode, body: &str) -> OcrError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorBody::Structured { status, message },
        }) => (status, message.unwrap_or_else(|| body.to_string())),
        Ok(ErrorEnvelope {
            error: ErrorBody::Plain(message),
        }) => (None, message),
        Err(_) => (None, body.to_string()),
    };
    let text = format!("{} API error ({}): {}", backend, status, message.trim());

    if let Some(kind) = code.as_deref().and_then(kind_from_status_code) {
        return OcrError::failed(kind, text);
    }

    let by_message = FailureKind::from_message(&message);
    let kind = match status.as_u16() {
        401 | 403 => FailureKind::Auth,
        402 => FailureKind::Quota,
        429 if by_message == FailureKind::Quota => FailureKind::Quota,
        429 => FailureKind::RateLimited,
        400 | 404 | 413 | 415 | 422 => {
            if matches!(by_message, FailureKind::Auth | FailureKind::Quota) {
                by_message
            } else {
                return OcrError::InvalidInput(text);
            }
        }
        408 | 500..=599 => FailureKind::Transient,
        _ => by_message,
    };
    OcrError::failed(kind, text)
}

/// Classify a transport-level failure (no HTTP response at all).
///
/// `service_expected_local` marks backends whose server runs on this machine;
/// a refused connection there means the service is not running.
pub fn classify_transport_error(
    backend: &str,
    err: &reqwest::Error,
    service_expected_local: bool,
) -> OcrError {
    if err.is_connect() && service_expected_local {
        OcrError::BackendUnavailable(format!("{} service not reachable: {}", backend, err))
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        OcrError::failed(
            FailureKind::Transient,
            format!("{} request failed: {}", backend, err),
        )
    } else if err.is_decode() {
        OcrError::failed(
            FailureKind::Parse,
            format!("{} response unreadable: {}", backend, err),
        )
    } else {
        OcrError::classify(format!("{} request failed: {}", backend, err))
    }
}
