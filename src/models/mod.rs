//! Core data types exchanged between recognition, placement and assembly.

mod chunk;
mod page;

pub use chunk::ContentChunk;
pub use page::{BoundingBox, PageImage, RecognizedWord};

/// Join word strings into page text in document order.
pub fn words_to_text(words: &[RecognizedWord]) -> String {
    words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
