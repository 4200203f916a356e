//! Apply recognized chunks to a PDF as invisible text layers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use console::style;
use tracing::warn;

use pagescribe::config::Config;
use pagescribe::models::ContentChunk;
use pagescribe::text_layer::{apply_text_layer, page_size_points, PageSurface};

use super::helpers::progress_bar;

/// Read a JSON Lines chunks file. A later line for the same page wins.
fn read_chunks(path: &Path) -> anyhow::Result<BTreeMap<u32, ContentChunk>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut chunks = BTreeMap::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chunk: ContentChunk = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid chunk", path.display(), n + 1))?;
        chunks.insert(chunk.page, chunk);
    }
    Ok(chunks)
}

/// Page surface for a chunk: the source image's pixels mapped onto the PDF page.
///
/// Block placement does not need the image, so a missing image only matters
/// for chunks with word boxes.
fn surface_for(chunk: &ContentChunk, page_pt: (f32, f32)) -> anyhow::Result<Option<PageSurface>> {
    let (width_pt, height_pt) = page_pt;
    let pixels = match image::image_dimensions(&chunk.image) {
        Ok(dims) => dims,
        Err(e) if chunk.has_geometry() => {
            warn!(
                "Cannot size page {} from {}: {}",
                chunk.page,
                chunk.image.display(),
                e
            );
            return Ok(None);
        }
        Err(_) => (width_pt.round().max(1.0) as u32, height_pt.round().max(1.0) as u32),
    };
    Ok(Some(PageSurface::new(pixels.0, pixels.1, width_pt, height_pt)?))
}

pub async fn cmd_overlay(
    config: &Config,
    pdf: &Path,
    chunks: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let chunks = read_chunks(chunks)?;
    let mut doc = lopdf::Document::load(pdf)
        .with_context(|| format!("Failed to load {}", pdf.display()))?;
    let pages = doc.get_pages();

    let pb = progress_bar(chunks.len() as u64);
    let mut layered = 0usize;
    let mut skipped = 0usize;

    for chunk in chunks.values() {
        pb.inc(1);
        let Some(&page_id) = pages.get(&chunk.page) else {
            pb.println(format!(
                "  {} page {} is not in the PDF ({} pages)",
                style("!").yellow(),
                chunk.page,
                pages.len()
            ));
            skipped += 1;
            continue;
        };

        let size = page_size_points(&doc, page_id)?;
        let Some(surface) = surface_for(chunk, size)? else {
            skipped += 1;
            continue;
        };
        match apply_text_layer(&mut doc, page_id, chunk, &surface, &config.placement)? {
            Some(mode) => {
                layered += 1;
                pb.set_message(format!("page {} ({:?})", chunk.page, mode));
            }
            None => skipped += 1,
        }
    }
    pb.finish_and_clear();

    let output = output.unwrap_or(pdf);
    doc.save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} Added text to {} pages ({} skipped) -> {}",
        style("✓").green(),
        layered,
        skipped,
        output.display()
    );
    Ok(())
}
