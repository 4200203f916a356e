//! Text recognition backends.
//!
//! Four interchangeable engines behind [`RecognitionBackend`]:
//!
//! - **Native**: platform recognizer (macOS Vision), fastest, plain text
//! - **Tesseract**: open engine, plain text or hOCR word geometry
//! - **Hosted**: Gemini vision model, paid per page, refusal-aware
//! - **Ollama**: locally served vision model, free but slow without a GPU
//!
//! Use [`BackendManager`] to pick the first available backend from the
//! configured preference order.

mod api_backend;
mod backend;
pub mod hocr;
mod hosted;
mod manager;
mod model_utils;
mod native;
mod ollama;
mod tesseract;

pub use backend::{
    ensure_image_exists, BackendCapabilities, BackendKind, FailureKind, OcrError, OcrResult,
    RecognitionBackend,
};
pub use hosted::{looks_like_refusal, HostedModelBackend};
pub use manager::{parse_order, BackendManager, BackendStatus};
pub use native::NativeBackend;
pub use ollama::OllamaBackend;
pub use tesseract::TesseractBackend;
