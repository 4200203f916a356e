//! Hosted multimodal model backend (Google Gemini vision API).
//!
//! Paid per page. Vision models occasionally decline to transcribe a page
//! ("I'm sorry, I can't help with that") or stop with a safety/recitation
//! finish reason. Such answers are detected and the request is repeated at a
//! higher sampling temperature, up to `refusal_retries` extra attempts.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::api_backend::{
    classify_http_failure, classify_transport_error, encode_image_base64, http_client,
    transcription_prompt,
};
use super::backend::{
    BackendCapabilities, BackendKind, FailureKind, OcrError, OcrResult, RecognitionBackend,
};
use crate::config::HostedSettings;

/// Upper bound accepted by the API.
const MAX_TEMPERATURE: f32 = 2.0;

/// Refusals are short; a long answer that happens to contain an apology is a transcription.
const REFUSAL_MAX_LEN: usize = 600;

static REFUSAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\W*(i'?m|i am)\s+(sorry|afraid|unable)",
        r"(?i)^\W*(sorry|unfortunately|apologies)\b",
        r"(?i)^\W*i\s+apologi[sz]e",
        r"(?i)\bi\s+(can(no|')t|cannot|am unable to|won'?t be able to)\s+(help|assist|transcribe|provide|reproduce|extract|process|read)",
        r"(?i)\bas an ai\b",
        r"(?i)\b(copyrighted|copyright)\s+(material|text|content)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Whether a model answer looks like a refusal rather than a transcription.
pub fn looks_like_refusal(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > REFUSAL_MAX_LEN {
        return false;
    }
    REFUSAL_PATTERNS.iter().any(|p| p.is_match(trimmed))
}

/// Hosted vision-model backend.
pub struct HostedModelBackend {
    settings: HostedSettings,
    language: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

/// What one API round trip produced.
#[derive(Debug, PartialEq)]
enum Answer {
    Text(String),
    Refused(String),
}

impl GeminiResponse {
    fn into_answer(self) -> Answer {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Answer::Refused(format!("prompt blocked: {}", reason));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Answer::Refused("no candidates returned".to_string());
        };

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        match candidate.finish_reason.as_deref() {
            Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
                Answer::Refused(format!(
                    "finish reason {}",
                    candidate.finish_reason.unwrap_or_default()
                ))
            }
            _ if looks_like_refusal(&text) => Answer::Refused(text),
            _ => Answer::Text(text),
        }
    }
}

impl HostedModelBackend {
    pub fn new(settings: HostedSettings, language: impl Into<String>) -> Self {
        Self {
            settings,
            language: language.into(),
        }
    }

    /// Temperature for the given attempt (0 = first try).
    fn temperature_for(&self, attempt: u32) -> f32 {
        (self.settings.temperature + self.settings.temperature_step * attempt as f32)
            .min(MAX_TEMPERATURE)
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    async fn request_once(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        image: &(String, &'static str),
        temperature: f32,
    ) -> Result<Answer, OcrError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: transcription_prompt(&self.language),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: image.1.to_string(),
                            data: image.0.clone(),
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                temperature,
                max_output_tokens: self.settings.max_output_tokens,
            },
        };

        let response = client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("gemini", &e, false))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("gemini", status, &body));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            OcrError::failed(
                FailureKind::Parse,
                format!("Failed to parse gemini response: {}", e),
            )
        })?;
        Ok(parsed.into_answer())
    }
}

#[async_trait]
impl RecognitionBackend for HostedModelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_geometry: false,
            is_free: false,
        }
    }

    async fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.settings.api_key.is_none() {
            "GEMINI_API_KEY not set. Get an API key from https://ai.google.dev/".to_string()
        } else {
            format!(
                "Hosted model is available (model: {}, ~${:.4}/page)",
                self.settings.model, self.settings.price_per_page
            )
        }
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let api_key = self.settings.api_key.as_deref().ok_or_else(|| {
            OcrError::BackendUnavailable("GEMINI_API_KEY not set".to_string())
        })?;

        let start = Instant::now();
        let image = encode_image_base64(image_path).await?;
        let client = http_client(Duration::from_secs(self.settings.timeout_secs))?;

        let mut last_refusal = String::new();
        for attempt in 0..=self.settings.refusal_retries {
            let temperature = self.temperature_for(attempt);
            match self
                .request_once(&client, api_key, &image, temperature)
                .await?
            {
                Answer::Text(text) => {
                    debug!(
                        "gemini transcribed {} (attempt {}, temperature {:.2})",
                        image_path.display(),
                        attempt + 1,
                        temperature
                    );
                    return Ok(OcrResult {
                        text: text.trim().to_string(),
                        words: None,
                        backend: BackendKind::Hosted,
                        model: Some(self.settings.model.clone()),
                        processing_time_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Answer::Refused(reason) => {
                    warn!(
                        "gemini refused {} at temperature {:.2}: {}",
                        image_path.display(),
                        temperature,
                        reason.chars().take(120).collect::<String>()
                    );
                    last_refusal = reason;
                }
            }
        }

        Err(OcrError::failed(
            FailureKind::Refusal,
            format!(
                "model refused after {} attempts: {}",
                self.settings.refusal_retries + 1,
                last_refusal.chars().take(200).collect::<String>()
            ),
        ))
    }

    fn estimate_cost(&self, page_count: usize) -> f64 {
        self.settings.price_per_page * page_count as f64
    }
}
