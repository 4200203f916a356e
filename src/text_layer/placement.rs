//! Font-size selection and layout for the invisible text layer.
//!
//! All lengths are PDF points unless a name says otherwise.

use crate::models::RecognizedWord;

use super::{PageSurface, PlacementConfig};

/// Horizontal-scaling bounds for geometric words (percent).
const MIN_HORIZONTAL_SCALE: f32 = 10.0;
const MAX_HORIZONTAL_SCALE: f32 = 500.0;

/// Chars-per-line growth factor while shrinking block text.
const LINE_GROWTH: f32 = 1.15;

/// One word positioned on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedWord {
    pub text: String,
    /// Baseline origin, PDF coordinates (origin bottom-left).
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    /// Horizontal scaling (`Tz`) that stretches the word to its box width.
    pub horizontal_scale: f32,
}

/// Flowed block of text anchored at the top-left margin.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    pub font_size: f32,
    pub leading: f32,
    pub chars_per_line: usize,
    pub lines: Vec<String>,
    /// Origin of the first baseline.
    pub x: f32,
    pub y: f32,
}

impl BlockLayout {
    /// Estimated rendered height of all lines.
    pub fn estimated_height(&self) -> f32 {
        self.lines.len() as f32 * self.leading
    }
}

/// Glyph size for a word box of the given height.
pub fn word_font_size(box_height: f32, config: &PlacementConfig) -> f32 {
    (box_height * config.geometric_height_ratio).clamp(config.min_word_font, config.max_word_font)
}

/// Place each word at its own box, converting from image pixels (top-left
/// origin) to page points (bottom-left origin).
pub fn place_words(
    words: &[RecognizedWord],
    surface: &PageSurface,
    config: &PlacementConfig,
) -> Vec<PlacedWord> {
    let sx = surface.scale_x();
    let sy = surface.scale_y();

    words
        .iter()
        .filter(|w| !w.text.trim().is_empty())
        .map(|word| {
            let box_width = word.bbox.width() as f32 * sx;
            let box_height = word.bbox.height() as f32 * sy;
            let font_size = word_font_size(box_height, config);

            let natural_width =
                word.text.chars().count() as f32 * config.avg_char_width * font_size;
            let horizontal_scale = if natural_width > 0.0 {
                (box_width / natural_width * 100.0).clamp(MIN_HORIZONTAL_SCALE, MAX_HORIZONTAL_SCALE)
            } else {
                100.0
            };

            // Baseline sits above the box bottom to leave room for descenders
            let bottom = surface.height_pt - word.bbox.y1 as f32 * sy;
            let descent = (box_height - font_size).max(0.0).min(box_height * 0.2);

            PlacedWord {
                text: word.text.clone(),
                x: word.bbox.x0 as f32 * sx,
                y: bottom + descent,
                font_size,
                horizontal_scale,
            }
        })
        .collect()
}

/// Greedy word wrap. Blank lines are dropped; words longer than a line stay whole.
pub fn wrap_text(text: &str, chars_per_line: usize) -> Vec<String> {
    let limit = chars_per_line.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        let mut line_len = 0usize;
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if line_len > 0 && line_len + 1 + word_len > limit {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            if line_len > 0 {
                line.push(' ');
                line_len += 1;
            }
            line.push_str(word);
            line_len += word_len;
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Choose a font size and wrapping that keeps the whole text inside the
/// page's vertical budget.
///
/// Starts at `chars_per_line` and the size that fills the usable width, then
/// widens lines (shrinking the font) until the estimated height fits. If
/// widening stops helping, the font is scaled down directly. The minimum
/// font clamp is applied only when it still fits.
pub fn layout_block(text: &str, surface: &PageSurface, config: &PlacementConfig) -> BlockLayout {
    let usable_width = (surface.width_pt - 2.0 * config.margin).max(1.0);
    let usable_height = (surface.height_pt - 2.0 * config.margin).max(1.0);
    let longest_line = text
        .lines()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
        .max(1);

    let font_for = |cpl: usize| {
        (usable_width / (cpl as f32 * config.avg_char_width)).min(config.block_max_font)
    };

    let mut chars_per_line = config.chars_per_line.max(1);
    let mut lines = wrap_text(text, chars_per_line);
    let mut font_size = font_for(chars_per_line);

    while lines.len() as f32 * font_size * config.line_spacing > usable_height {
        if chars_per_line >= longest_line {
            // Wider lines no longer reduce the line count
            font_size = usable_height / (lines.len() as f32 * config.line_spacing);
            break;
        }
        chars_per_line = ((chars_per_line as f32 * LINE_GROWTH).ceil() as usize)
            .max(chars_per_line + 1)
            .min(longest_line);
        lines = wrap_text(text, chars_per_line);
        font_size = font_for(chars_per_line);
    }

    if font_size < config.block_min_font
        && lines.len() as f32 * config.block_min_font * config.line_spacing <= usable_height
    {
        font_size = config.block_min_font;
    }

    BlockLayout {
        font_size,
        leading: font_size * config.line_spacing,
        chars_per_line,
        lines,
        x: config.margin,
        y: surface.height_pt - config.margin - font_size,
    }
}
