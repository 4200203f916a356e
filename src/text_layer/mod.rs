//! Invisible, searchable text layer.
//!
//! Recognized text is drawn with text rendering mode 3 (neither fill nor
//! stroke), so viewers show only the page image while selection, copy and
//! search see the text. Word boxes are used when present (geometric mode);
//! otherwise the whole page text is flowed as one block near the top.

mod pdf;
mod placement;

use lopdf::content::{Content, Operation};
use lopdf::Object;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ContentChunk;

pub use pdf::{apply_text_layer, page_size_points, FONT_RESOURCE_NAME};
pub use placement::{
    layout_block, place_words, word_font_size, wrap_text, BlockLayout, PlacedWord,
};

/// PDF points per inch.
pub const POINTS_PER_INCH: f32 = 72.0;

/// Text rendering mode that paints nothing.
const INVISIBLE_RENDER_MODE: i64 = 3;

#[derive(Debug, Error)]
pub enum TextLayerError {
    #[error("Invalid page surface: {0}")]
    InvalidSurface(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Tunable placement constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Glyph height as a fraction of the word box height.
    pub geometric_height_ratio: f32,
    pub min_word_font: f32,
    pub max_word_font: f32,
    /// Starting line width for block placement.
    pub chars_per_line: usize,
    pub block_min_font: f32,
    pub block_max_font: f32,
    /// Page margin in points for block placement.
    pub margin: f32,
    /// Leading as a multiple of font size.
    pub line_spacing: f32,
    /// Average glyph advance as a fraction of font size.
    pub avg_char_width: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            geometric_height_ratio: 0.85,
            min_word_font: 4.0,
            max_word_font: 72.0,
            chars_per_line: 80,
            block_min_font: 6.0,
            block_max_font: 14.0,
            margin: 36.0,
            line_spacing: 1.2,
            avg_char_width: 0.5,
        }
    }
}

/// Page image size in pixels and the page size in points it maps onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSurface {
    pub width_px: u32,
    pub height_px: u32,
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSurface {
    pub fn new(
        width_px: u32,
        height_px: u32,
        width_pt: f32,
        height_pt: f32,
    ) -> Result<Self, TextLayerError> {
        if width_px == 0 || height_px == 0 {
            return Err(TextLayerError::InvalidSurface(format!(
                "image has zero size ({}x{} px)",
                width_px, height_px
            )));
        }
        if !(width_pt > 0.0 && height_pt > 0.0) {
            return Err(TextLayerError::InvalidSurface(format!(
                "page has no area ({}x{} pt)",
                width_pt, height_pt
            )));
        }
        Ok(Self {
            width_px,
            height_px,
            width_pt,
            height_pt,
        })
    }

    /// Page sized from the image resolution.
    pub fn at_dpi(width_px: u32, height_px: u32, dpi: f32) -> Result<Self, TextLayerError> {
        if !(dpi > 0.0) {
            return Err(TextLayerError::InvalidSurface(format!("bad dpi {}", dpi)));
        }
        let scale = POINTS_PER_INCH / dpi;
        Self::new(
            width_px,
            height_px,
            width_px as f32 * scale,
            height_px as f32 * scale,
        )
    }

    pub fn scale_x(&self) -> f32 {
        self.width_pt / self.width_px as f32
    }

    pub fn scale_y(&self) -> f32 {
        self.height_pt / self.height_px as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    Geometric,
    Block,
}

impl PlacementMode {
    /// Geometric when the chunk carries word boxes.
    pub fn for_chunk(chunk: &ContentChunk) -> Self {
        if chunk.has_geometry() {
            PlacementMode::Geometric
        } else {
            PlacementMode::Block
        }
    }
}

/// Builds text-layer content operations for one page.
pub struct TextLayerBuilder<'a> {
    config: &'a PlacementConfig,
    font_name: &'a [u8],
}

impl<'a> TextLayerBuilder<'a> {
    pub fn new(config: &'a PlacementConfig) -> Self {
        Self {
            config,
            font_name: FONT_RESOURCE_NAME,
        }
    }

    /// Operations for the chunk. Empty when there is no text to place.
    pub fn operations(&self, chunk: &ContentChunk, surface: &PageSurface) -> Vec<Operation> {
        match (PlacementMode::for_chunk(chunk), chunk.words.as_deref()) {
            (PlacementMode::Geometric, Some(words)) => {
                self.geometric(&place_words(words, surface, self.config))
            }
            _ => self.block(&layout_block(&chunk.text, surface, self.config)),
        }
    }

    /// Encoded content stream bytes.
    pub fn encode(
        &self,
        chunk: &ContentChunk,
        surface: &PageSurface,
    ) -> Result<Vec<u8>, TextLayerError> {
        let operations = self.operations(chunk, surface);
        Ok(Content { operations }.encode()?)
    }

    fn geometric(&self, words: &[PlacedWord]) -> Vec<Operation> {
        if words.is_empty() {
            return Vec::new();
        }
        let mut ops = self.begin(words[0].font_size);
        for word in words {
            ops.push(self.set_font(word.font_size));
            ops.push(Operation::new("Tz", vec![word.horizontal_scale.into()]));
            ops.push(Operation::new(
                "Tm",
                vec![
                    Object::Integer(1),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(1),
                    word.x.into(),
                    word.y.into(),
                ],
            ));
            ops.push(Operation::new("Tj", vec![encode_text(&word.text)]));
        }
        ops.push(Operation::new("ET", vec![]));
        ops
    }

    fn block(&self, layout: &BlockLayout) -> Vec<Operation> {
        if layout.lines.is_empty() {
            return Vec::new();
        }
        let mut ops = self.begin(layout.font_size);
        ops.push(Operation::new("TL", vec![layout.leading.into()]));
        ops.push(Operation::new("Td", vec![layout.x.into(), layout.y.into()]));
        for line in &layout.lines {
            ops.push(Operation::new("Tj", vec![encode_text(line)]));
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new("ET", vec![]));
        ops
    }

    fn begin(&self, font_size: f32) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            self.set_font(font_size),
            Operation::new("Tr", vec![INVISIBLE_RENDER_MODE.into()]),
        ]
    }

    fn set_font(&self, size: f32) -> Operation {
        Operation::new(
            "Tf",
            vec![Object::Name(self.font_name.to_vec()), size.into()],
        )
    }
}

/// Encode text for a WinAnsi font. Characters outside Latin-1 become `?`.
fn encode_text(text: &str) -> Object {
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7e | 0xa0..=0xff => c as u8,
            _ if c.is_whitespace() => b' ',
            _ => b'?',
        })
        .collect();
    Object::string_literal(bytes)
}
