//! Word-geometry markup parser.
//!
//! Accepts Tesseract hOCR (`<span class='ocrx_word' title='bbox 10 10 50 30; x_wconf 91'>`)
//! and the compact form `<word bbox="10 10 50 30" conf="91">`. Entries without a
//! well-formed, non-degenerate box are dropped.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::models::{BoundingBox, RecognizedWord};

static WORD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("word, .ocrx_word").unwrap());

/// Parse word entries in document order.
pub fn parse_words(markup: &str) -> Vec<RecognizedWord> {
    let document = Html::parse_document(markup);

    document
        .select(&WORD_SELECTOR)
        .filter_map(parse_word)
        .collect()
}

fn parse_word(element: ElementRef<'_>) -> Option<RecognizedWord> {
    let text = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }

    let attrs = element.value();
    let title = attrs.attr("title").map(parse_title);

    let bbox = match attrs.attr("bbox") {
        Some(raw) => parse_bbox(raw)?,
        None => title.as_ref().and_then(|t| t.bbox)?,
    };

    let confidence = attrs
        .attr("conf")
        .or_else(|| attrs.attr("confidence"))
        .and_then(|c| c.trim().parse::<f32>().ok())
        .or_else(|| title.as_ref().and_then(|t| t.confidence));

    Some(RecognizedWord {
        text,
        bbox,
        confidence,
    })
}

/// Properties carried in an hOCR `title` attribute.
#[derive(Debug, Default)]
struct TitleProps {
    bbox: Option<BoundingBox>,
    confidence: Option<f32>,
}

fn parse_title(title: &str) -> TitleProps {
    let mut props = TitleProps::default();
    for part in title.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("bbox ") {
            props.bbox = parse_bbox(rest);
        } else if let Some(rest) = part.strip_prefix("x_wconf ") {
            props.confidence = rest.trim().parse().ok();
        }
    }
    props
}

/// Parse exactly four non-negative integers: left, top, right, bottom.
fn parse_bbox(raw: &str) -> Option<BoundingBox> {
    let coords: Vec<u32> = raw
        .split_whitespace()
        .map(|n| n.parse::<u32>().ok())
        .collect::<Option<_>>()?;
    match coords.as_slice() {
        [x0, y0, x1, y1] => BoundingBox::new(*x0, *y0, *x1, *y1),
        _ => None,
    }
}
