//! Page image references and recognized word geometry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A rasterized page produced by the capture collaborator.
///
/// Read-only to this crate: recognition and placement only borrow the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// Location of the image on disk.
    pub path: PathBuf,
    /// Page number (1-indexed, strictly increasing within a job).
    pub page: u32,
    /// Position within the capture sequence (0-indexed).
    pub index: usize,
}

impl PageImage {
    pub fn new(path: impl Into<PathBuf>, page: u32, index: usize) -> Self {
        Self {
            path: path.into(),
            page,
            index,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Word rectangle in image pixel space, origin top-left.
///
/// Deserialization goes through [`BoundingBox::new`], so degenerate boxes
/// in a chunks file are an error rather than a zero or negative extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BoundingBox {
    /// Build a box, rejecting degenerate rectangles (`x1 <= x0` or `y1 <= y0`).
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Option<Self> {
        if x1 > x0 && y1 > y0 {
            Some(Self { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

#[derive(Deserialize)]
struct RawBoundingBox {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = String;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        BoundingBox::new(raw.x0, raw.y0, raw.x1, raw.y1).ok_or_else(|| {
            format!(
                "degenerate bbox ({}, {}, {}, {})",
                raw.x0, raw.y0, raw.x1, raw.y1
            )
        })
    }
}

/// One word produced by a geometry-capable backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// Engine-reported confidence, in the engine's own scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}
