//! Backend registry and fallback selection.
//!
//! Backends are tried in the configured preference order. A backend that
//! reports `BackendUnavailable` is skipped so the next one can take over;
//! every other outcome is returned to the caller as is.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::backend::{
    BackendCapabilities, BackendKind, OcrError, OcrResult, RecognitionBackend,
};
use super::hosted::HostedModelBackend;
use super::native::NativeBackend;
use super::ollama::OllamaBackend;
use super::tesseract::TesseractBackend;
use crate::config::OcrSettings;

/// Availability report for one backend.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub available: bool,
    pub hint: String,
    pub capabilities: BackendCapabilities,
    /// Estimated USD cost for the page count the report was made for.
    pub estimated_cost: f64,
}

/// Registry of recognition backends keyed by kind.
#[derive(Default)]
pub struct BackendManager {
    backends: HashMap<BackendKind, Arc<dyn RecognitionBackend>>,
    order: Vec<BackendKind>,
}

impl BackendManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build all four backends from settings, ordered by `settings.backends`.
    pub fn from_settings(settings: &OcrSettings) -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(NativeBackend::new(&settings.native)));
        manager.register(Arc::new(TesseractBackend::with_settings(
            &settings.language,
            &settings.tesseract,
        )));
        manager.register(Arc::new(HostedModelBackend::new(
            settings.hosted.clone(),
            settings.language.clone(),
        )));
        manager.register(Arc::new(OllamaBackend::new(
            settings.ollama.clone(),
            settings.language.clone(),
        )));
        manager.set_order(parse_order(&settings.backends));
        manager
    }

    /// Register a backend, replacing any existing backend of the same kind.
    pub fn register(&mut self, backend: Arc<dyn RecognitionBackend>) {
        let kind = backend.kind();
        if !self.order.contains(&kind) {
            self.order.push(kind);
        }
        self.backends.insert(kind, backend);
    }

    /// Set the preference order. Registered kinds missing from `order` are dropped from it.
    pub fn set_order(&mut self, order: Vec<BackendKind>) {
        self.order = order;
    }

    pub fn order(&self) -> &[BackendKind] {
        &self.order
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn RecognitionBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Probe every registered backend.
    pub async fn status(&self, page_count: usize) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for kind in BackendKind::ALL {
            let Some(backend) = self.backends.get(&kind) else {
                continue;
            };
            statuses.push(BackendStatus {
                kind,
                available: backend.is_available().await,
                hint: backend.availability_hint(),
                capabilities: backend.capabilities(),
                estimated_cost: backend.estimate_cost(page_count),
            });
        }
        statuses
    }

    /// First available backend in preference order.
    pub async fn select(&self) -> Option<Arc<dyn RecognitionBackend>> {
        for kind in &self.order {
            let Some(backend) = self.backends.get(kind) else {
                continue;
            };
            if backend.is_available().await {
                info!("Using {} recognition backend", kind);
                return Some(backend.clone());
            }
            debug!("{} backend not available: {}", kind, backend.availability_hint());
        }
        None
    }

    /// Recognize with the first backend in order that does not report itself unavailable.
    pub async fn recognize_with_fallback(
        &self,
        image_path: &Path,
        with_geometry: bool,
    ) -> Result<OcrResult, OcrError> {
        let mut last_error = None;

        for kind in &self.order {
            let Some(backend) = self.backends.get(kind) else {
                continue;
            };
            let result = if with_geometry && backend.capabilities().supports_geometry {
                backend.recognize_with_geometry(image_path).await
            } else {
                backend.recognize(image_path).await
            };
            match result {
                Err(OcrError::BackendUnavailable(reason)) => {
                    debug!("{} unavailable, trying next backend: {}", kind, reason);
                    last_error = Some(OcrError::BackendUnavailable(reason));
                }
                other => return other,
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OcrError::BackendUnavailable("no recognition backends configured".to_string())
        }))
    }
}

/// Parse backend names, skipping unknown entries with a warning.
pub fn parse_order(names: &[String]) -> Vec<BackendKind> {
    let mut order = Vec::new();
    for name in names {
        match BackendKind::from_str(name) {
            Some(kind) if !order.contains(&kind) => order.push(kind),
            Some(_) => {}
            None => warn!("Unknown recognition backend '{}', ignoring", name),
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeBackend {
        kind: BackendKind,
        available: bool,
    }

    #[async_trait]
    impl RecognitionBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities {
                supports_geometry: false,
                is_free: true,
            }
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        fn availability_hint(&self) -> String {
            format!("{} hint", self.kind)
        }

        async fn recognize(&self, _image_path: &Path) -> Result<OcrResult, OcrError> {
            if !self.available {
                return Err(OcrError::BackendUnavailable("down".to_string()));
            }
            Ok(OcrResult {
                text: self.kind.to_string(),
                words: None,
                backend: self.kind,
                model: None,
                processing_time_ms: 0,
            })
        }
    }

    fn manager() -> BackendManager {
        let mut manager = BackendManager::new();
        manager.register(Arc::new(FakeBackend {
            kind: BackendKind::Native,
            available: false,
        }));
        manager.register(Arc::new(FakeBackend {
            kind: BackendKind::Tesseract,
            available: true,
        }));
        manager
    }

    #[test]
    fn test_parse_order() {
        let names = ["gemini", "bogus", "tesseract", "hosted"].map(String::from);
        assert_eq!(
            parse_order(&names),
            vec![BackendKind::Hosted, BackendKind::Tesseract]
        );
    }

    #[tokio::test]
    async fn test_select_skips_unavailable() {
        let selected = manager().select().await.unwrap();
        assert_eq!(selected.kind(), BackendKind::Tesseract);
    }

    #[tokio::test]
    async fn test_fallback_on_unavailable() {
        let result = manager()
            .recognize_with_fallback(Path::new("page.png"), false)
            .await
            .unwrap();
        assert_eq!(result.backend, BackendKind::Tesseract);
    }

    #[tokio::test]
    async fn test_empty_order_is_unavailable() {
        let mut manager = manager();
        manager.set_order(Vec::new());
        assert!(manager.select().await.is_none());
        let err = manager
            .recognize_with_fallback(Path::new("page.png"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_status_reports_every_backend() {
        let statuses = manager().status(10).await;
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].available);
        assert_eq!(statuses[1].hint, "tesseract hint");
    }
}
