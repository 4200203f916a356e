//! Per-page unit handed to the document assembler.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{words_to_text, PageImage, RecognizedWord};

/// Recognized text for one page, with optional word geometry.
///
/// `text` is always present; it is empty when recognition was skipped or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub index: usize,
    pub page: u32,
    pub text: String,
    pub image: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<RecognizedWord>>,
}

impl ContentChunk {
    /// Chunk carrying plain text only.
    pub fn from_text(image: &PageImage, text: impl Into<String>) -> Self {
        Self {
            index: image.index,
            page: image.page,
            text: text.into(),
            image: image.path.clone(),
            words: None,
        }
    }

    /// Chunk carrying word geometry; text is derived from the words.
    pub fn from_words(image: &PageImage, words: Vec<RecognizedWord>) -> Self {
        Self {
            index: image.index,
            page: image.page,
            text: words_to_text(&words),
            image: image.path.clone(),
            words: Some(words),
        }
    }

    /// Chunk for a page whose recognition did not produce anything.
    pub fn empty(image: &PageImage) -> Self {
        Self::from_text(image, String::new())
    }

    /// Whether per-word placement is possible for this chunk.
    pub fn has_geometry(&self) -> bool {
        self.words.as_ref().is_some_and(|w| !w.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    #[test]
    fn test_text_derived_from_words() {
        let image = PageImage::new("/tmp/p1.png", 1, 0);
        let words = vec![
            RecognizedWord {
                text: "Hello".to_string(),
                bbox: BoundingBox::new(10, 10, 50, 30).unwrap(),
                confidence: Some(96.0),
            },
            RecognizedWord {
                text: "World".to_string(),
                bbox: BoundingBox::new(55, 10, 90, 30).unwrap(),
                confidence: None,
            },
        ];
        let chunk = ContentChunk::from_words(&image, words);
        assert_eq!(chunk.text, "Hello World");
        assert!(chunk.has_geometry());
    }

    #[test]
    fn test_empty_chunk_has_empty_text() {
        let image = PageImage::new("/tmp/p2.png", 2, 1);
        let chunk = ContentChunk::empty(&image);
        assert_eq!(chunk.text, "");
        assert!(!chunk.has_geometry());
        assert_eq!(chunk.page, 2);
    }
}
