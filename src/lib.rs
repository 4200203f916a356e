//! pagescribe - resumable OCR and searchable text layers for captured pages.
//!
//! Page images go through a recognition backend (native, Tesseract, hosted
//! or local multimodal model) wrapped with retries and a circuit breaker.
//! Recognized text becomes per-page [`models::ContentChunk`]s, which can be
//! laid over PDF pages as an invisible text layer. Long jobs checkpoint after
//! every page and resume where they stopped.

pub mod batch;
pub mod config;
pub mod models;
pub mod ocr;
pub mod resilience;
pub mod run_state;
pub mod text_layer;
pub mod workflow;
