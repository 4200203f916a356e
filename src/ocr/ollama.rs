//! Local multimodal model backend served by Ollama.
//!
//! Free but resource heavy. Requests carry `keep_alive` so the service keeps
//! the vision model loaded between pages instead of reloading it each time.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api_backend::{
    classify_http_failure, classify_transport_error, encode_image_base64, http_client,
    transcription_prompt,
};
use super::backend::{
    BackendCapabilities, BackendKind, FailureKind, OcrError, OcrResult, RecognitionBackend,
};
use crate::config::OllamaSettings;

/// Timeout for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Local vision model backend.
pub struct OllamaBackend {
    settings: OllamaSettings,
    language: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    images: Vec<String>,
    stream: bool,
    keep_alive: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

/// Whether `installed` names the configured model ("llava" matches "llava:latest").
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed
            .strip_suffix(":latest")
            .is_some_and(|base| base == wanted)
}

impl OllamaBackend {
    pub fn new(settings: OllamaSettings, language: impl Into<String>) -> Self {
        Self {
            settings,
            language: language.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.endpoint.trim_end_matches('/'), path)
    }

    /// List installed model names.
    pub async fn list_models(&self) -> Result<Vec<String>, OcrError> {
        let client = http_client(PROBE_TIMEOUT)?;
        let resp = client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| classify_transport_error("ollama", &e, true))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_failure("ollama", status, &body));
        }

        let tags: TagsResponse = resp.json().await.map_err(|e| {
            OcrError::failed(FailureKind::Parse, format!("Failed to parse model list: {}", e))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl RecognitionBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_geometry: false,
            is_free: true,
        }
    }

    async fn is_available(&self) -> bool {
        match self.list_models().await {
            Ok(models) => models
                .iter()
                .any(|m| model_matches(m, &self.settings.model)),
            Err(_) => false,
        }
    }

    fn availability_hint(&self) -> String {
        format!(
            "Requires a running Ollama service at {} with the '{}' model pulled (ollama pull {})",
            self.settings.endpoint, self.settings.model, self.settings.model
        )
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let (image, _mime) = encode_image_base64(image_path).await?;
        let client = http_client(Duration::from_secs(self.settings.timeout_secs))?;

        let request = OllamaRequest {
            model: &self.settings.model,
            prompt: transcription_prompt(&self.language),
            images: vec![image],
            stream: false,
            keep_alive: &self.settings.keep_alive,
            options: OllamaOptions {
                temperature: self.settings.temperature,
            },
        };

        let resp = client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("ollama", &e, true))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(OcrError::BackendUnavailable(format!(
                "ollama model '{}' is not installed",
                self.settings.model
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_failure("ollama", status, &body));
        }

        let parsed: OllamaResponse = resp.json().await.map_err(|e| {
            OcrError::failed(
                FailureKind::Parse,
                format!("Failed to parse ollama response: {}", e),
            )
        })?;

        debug!(
            "ollama transcribed {} in {:?}",
            image_path.display(),
            start.elapsed()
        );

        Ok(OcrResult {
            text: parsed.response.trim().to_string(),
            words: None,
            backend: BackendKind::Ollama,
            model: Some(self.settings.model.clone()),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matching() {
        assert!(model_matches("llava:latest", "llava"));
        assert!(model_matches("llava:13b", "llava:13b"));
        assert!(!model_matches("llava:13b", "llava"));
        assert!(!model_matches("llama3.2-vision:latest", "llama3.2"));
    }

    #[test]
    fn test_request_shape() {
        let request = OllamaRequest {
            model: "llava",
            prompt: "p".to_string(),
            images: vec!["aGk=".to_string()],
            stream: false,
            keep_alive: "30m",
            options: OllamaOptions { temperature: 0.0 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["keep_alive"], "30m");
        assert_eq!(json["stream"], false);
        assert_eq!(json["images"][0], "aGk=");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let backend = OllamaBackend::new(
            OllamaSettings {
                endpoint: "http://127.0.0.1:9".to_string(),
                ..Default::default()
            },
            "eng",
        );
        assert!(!backend.is_available().await);
        assert!(backend.capabilities().is_free);
    }
}
