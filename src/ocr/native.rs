//! Native platform recognizer.
//!
//! Apple's Vision framework is the fastest recognizer on macOS but has no
//! command-line front end of its own, so it is reached through a small helper
//! executable (default `macocr`) that prints the recognized text on stdout:
//!
//! ```text
//! macocr --level accurate page-0001.png
//! ```
//!
//! Only available on macOS. Plain text only.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::backend::{
    ensure_image_exists, BackendCapabilities, BackendKind, OcrError, OcrResult,
    RecognitionBackend,
};
use super::model_utils::{check_binary, run_recognizer};
use crate::config::NativeSettings;

/// Native recognizer backend.
pub struct NativeBackend {
    binary: PathBuf,
    level: String,
}

impl NativeBackend {
    pub fn new(settings: &NativeSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            level: settings.recognition_level.clone(),
        }
    }

    fn platform_supported() -> bool {
        cfg!(target_os = "macos")
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new(&NativeSettings::default())
    }
}

#[async_trait]
impl RecognitionBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_geometry: false,
            is_free: true,
        }
    }

    async fn is_available(&self) -> bool {
        Self::platform_supported() && check_binary(&self.binary)
    }

    fn availability_hint(&self) -> String {
        if !Self::platform_supported() {
            "Native recognizer requires macOS (Vision framework)".to_string()
        } else if !check_binary(&self.binary) {
            format!(
                "Vision helper '{}' not found. Install a Vision OCR CLI and set ocr.native.binary",
                self.binary.display()
            )
        } else {
            format!("Native recognizer is available (level: {})", self.level)
        }
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError> {
        if !Self::platform_supported() {
            return Err(OcrError::BackendUnavailable(
                "native recognizer requires macOS".to_string(),
            ));
        }
        ensure_image_exists(image_path)?;

        let start = Instant::now();
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--level", &self.level]).arg(image_path);
        let text = run_recognizer(&mut cmd, "vision helper", "set ocr.native.binary").await?;

        Ok(OcrResult {
            text: text.trim().to_string(),
            words: None,
            backend: BackendKind::Native,
            model: None,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
