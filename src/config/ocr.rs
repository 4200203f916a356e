//! Recognition backend settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings shared by all recognition backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Language hint (Tesseract codes, e.g. "eng", "deu+eng").
    pub language: String,
    /// Backend preference order; the first available one is used.
    pub backends: Vec<String>,
    /// Request word geometry from backends that support it.
    pub prefer_geometry: bool,
    pub native: NativeSettings,
    pub tesseract: TesseractSettings,
    pub hosted: HostedSettings,
    pub ollama: OllamaSettings,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            backends: vec!["native".to_string(), "tesseract".to_string()],
            prefer_geometry: true,
            native: NativeSettings::default(),
            tesseract: TesseractSettings::default(),
            hosted: HostedSettings::default(),
            ollama: OllamaSettings::default(),
        }
    }
}

/// Native platform recognizer (Apple Vision helper executable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeSettings {
    pub binary: PathBuf,
    /// "accurate" or "fast".
    pub recognition_level: String,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("macocr"),
            recognition_level: "accurate".to_string(),
        }
    }
}

/// Tesseract command-line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractSettings {
    pub binary: PathBuf,
    /// Page segmentation mode passed as `--psm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psm: Option<u8>,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            psm: None,
        }
    }
}

/// Hosted multimodal model (Gemini API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedSettings {
    /// API key. Usually supplied through GEMINI_API_KEY.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    /// Estimated USD cost per page image.
    pub price_per_page: f64,
    /// Sampling temperature of the first attempt.
    pub temperature: f32,
    /// Extra attempts after a detected refusal.
    pub refusal_retries: u32,
    /// Temperature increase per refusal retry.
    pub temperature_step: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for HostedSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            price_per_page: 0.0015,
            temperature: 0.0,
            refusal_retries: 2,
            temperature_step: 0.4,
            max_output_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

/// Local multimodal model served by Ollama.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub endpoint: String,
    pub model: String,
    /// How long the service keeps the model resident between requests.
    pub keep_alive: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2-vision".to_string(),
            keep_alive: "30m".to_string(),
            temperature: 0.0,
            // Large vision models are slow on CPU
            timeout_secs: 300,
        }
    }
}
