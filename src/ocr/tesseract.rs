//! Tesseract OCR backend implementation.
//!
//! Plain text comes from `tesseract <image> stdout`; word geometry comes from
//! the `hocr` output config and is structured by [`super::hocr`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::backend::{
    ensure_image_exists, BackendCapabilities, BackendKind, OcrError, OcrResult,
    RecognitionBackend,
};
use super::hocr;
use super::model_utils::{check_binary, run_recognizer};
use crate::config::TesseractSettings;
use crate::models::words_to_text;

const INSTALL_HINT: &str = "install tesseract-ocr";

/// Tesseract OCR backend.
pub struct TesseractBackend {
    binary: PathBuf,
    language: String,
    page_segmentation_mode: Option<u8>,
}

impl TesseractBackend {
    /// Create a new Tesseract backend with default settings.
    pub fn new(language: impl Into<String>) -> Self {
        Self::with_settings(language, &TesseractSettings::default())
    }

    pub fn with_settings(language: impl Into<String>, settings: &TesseractSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            language: language.into(),
            page_segmentation_mode: settings.psm,
        }
    }

    fn command(&self, image_path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language]);
        if let Some(psm) = self.page_segmentation_mode {
            cmd.args(["--psm", &psm.to_string()]);
        }
        cmd
    }

    async fn run(&self, image_path: &Path, hocr_output: bool) -> Result<String, OcrError> {
        ensure_image_exists(image_path)?;
        let mut cmd = self.command(image_path);
        if hocr_output {
            cmd.arg("hocr");
        }
        run_recognizer(&mut cmd, "tesseract", INSTALL_HINT).await
    }
}

#[async_trait]
impl RecognitionBackend for TesseractBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tesseract
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_geometry: true,
            is_free: true,
        }
    }

    async fn is_available(&self) -> bool {
        check_binary(&self.binary)
    }

    fn availability_hint(&self) -> String {
        if check_binary(&self.binary) {
            format!("Tesseract is available (language: {})", self.language)
        } else {
            "Tesseract not installed. Install with: apt install tesseract-ocr (or brew install tesseract)"
                .to_string()
        }
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let text = self.run(image_path, false).await?;

        Ok(OcrResult {
            text: text.trim().to_string(),
            words: None,
            backend: BackendKind::Tesseract,
            model: None,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn recognize_with_geometry(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let markup = self.run(image_path, true).await?;
        let words = hocr::parse_words(&markup);
        debug!(
            "tesseract hocr: {} words from {}",
            words.len(),
            image_path.display()
        );

        Ok(OcrResult {
            text: words_to_text(&words),
            words: Some(words),
            backend: BackendKind::Tesseract,
            model: None,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let backend = TesseractBackend::new("eng");
        let caps = backend.capabilities();
        assert!(caps.supports_geometry);
        assert!(caps.is_free);
        assert_eq!(backend.estimate_cost(500), 0.0);
    }

    #[tokio::test]
    async fn test_missing_image_rejected_before_spawn() {
        let backend = TesseractBackend::new("eng");
        let err = backend
            .recognize(Path::new("/no/such/page.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::InvalidInput(_)));
    }
}
