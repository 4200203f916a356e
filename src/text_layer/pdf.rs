//! Applying the text layer to an existing PDF page with lopdf.
//!
//! A Helvetica font is registered in the page resources under
//! [`FONT_RESOURCE_NAME`] and the text operations are appended as a new
//! content stream after the page's existing drawing.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tracing::debug;

use super::{PageSurface, PlacementConfig, PlacementMode, TextLayerBuilder, TextLayerError};
use crate::models::ContentChunk;

/// Resource name of the text-layer font. Unusual enough not to collide with page fonts.
pub const FONT_RESOURCE_NAME: &[u8] = b"PsTxt";

/// Add an invisible text layer for `chunk` to the page `page_id`.
///
/// Returns the placement mode used, or `None` if the chunk had no text.
pub fn apply_text_layer(
    doc: &mut Document,
    page_id: ObjectId,
    chunk: &ContentChunk,
    surface: &PageSurface,
    config: &PlacementConfig,
) -> Result<Option<PlacementMode>, TextLayerError> {
    let builder = TextLayerBuilder::new(config);
    let operations = builder.operations(chunk, surface);
    if operations.is_empty() {
        return Ok(None);
    }

    let content = lopdf::content::Content { operations }.encode()?;
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    register_font(doc, page_id, font_id)?;
    doc.add_page_contents(page_id, content)?;

    let mode = PlacementMode::for_chunk(chunk);
    debug!(
        "Added {:?} text layer to page {} ({} chars)",
        mode,
        chunk.page,
        chunk.text.len()
    );
    Ok(Some(mode))
}

/// Page size in points from the (possibly inherited) MediaBox.
pub fn page_size_points(doc: &Document, page_id: ObjectId) -> Result<(f32, f32), TextLayerError> {
    let media_box = inherited_attribute(doc, page_id, b"MediaBox")?
        .ok_or_else(|| TextLayerError::InvalidSurface("page has no MediaBox".to_string()))?;
    let media_box = match media_box {
        Object::Reference(id) => doc.get_object(id)?.clone(),
        other => other,
    };

    let coords = media_box
        .as_array()?
        .iter()
        .map(|v| v.as_float())
        .collect::<Result<Vec<f32>, _>>()?;
    match coords.as_slice() {
        [x0, y0, x1, y1] => Ok(((x1 - x0).abs(), (y1 - y0).abs())),
        _ => Err(TextLayerError::InvalidSurface(format!(
            "MediaBox has {} entries",
            coords.len()
        ))),
    }
}

/// Look up a page attribute, walking up the page tree for inherited values.
fn inherited_attribute(
    doc: &Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<Object>, TextLayerError> {
    let mut node_id = page_id;
    // Page trees are shallow; the bound only guards against reference cycles
    for _ in 0..64 {
        let node = doc.get_object(node_id)?.as_dict()?;
        if let Ok(value) = node.get(key) {
            return Ok(Some(value.clone()));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node_id = parent,
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

fn register_font(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
) -> Result<(), TextLayerError> {
    // Make the page own its Resources entry so the font lands where the page looks
    let page_has_resources = doc.get_object(page_id)?.as_dict()?.has(b"Resources");
    if !page_has_resources {
        let inherited = inherited_attribute(doc, page_id, b"Resources")?
            .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
        doc.get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Resources", inherited);
    }

    let resources_ref = match doc.get_object(page_id)?.as_dict()?.get(b"Resources")? {
        Object::Reference(id) => Some(*id),
        _ => None,
    };
    let fonts_ref = {
        let resources = resources(doc, page_id, resources_ref)?;
        match resources.get(b"Font") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };

    let fonts = match fonts_ref {
        Some(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        None => {
            let resources = resources_mut(doc, page_id, resources_ref)?;
            if !matches!(resources.get(b"Font"), Ok(Object::Dictionary(_))) {
                resources.set("Font", Dictionary::new());
            }
            resources.get_mut(b"Font")?.as_dict_mut()?
        }
    };
    fonts.set(FONT_RESOURCE_NAME, font_id);
    Ok(())
}

fn resources(
    doc: &Document,
    page_id: ObjectId,
    resources_ref: Option<ObjectId>,
) -> Result<&Dictionary, TextLayerError> {
    let object = match resources_ref {
        Some(id) => doc.get_object(id)?,
        None => doc.get_object(page_id)?.as_dict()?.get(b"Resources")?,
    };
    Ok(object.as_dict()?)
}

fn resources_mut(
    doc: &mut Document,
    page_id: ObjectId,
    resources_ref: Option<ObjectId>,
) -> Result<&mut Dictionary, TextLayerError> {
    let object = match resources_ref {
        Some(id) => doc.get_object_mut(id)?,
        None => doc
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .get_mut(b"Resources")?,
    };
    Ok(object.as_dict_mut()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, PageImage, RecognizedWord};
    use lopdf::content::Content;
    use lopdf::Stream;

    /// One-page document. Resources sit on the page or on the page tree root.
    fn one_page_doc(inherit_resources: bool) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"q\nQ\n".to_vec()));
        let image_resources = dictionary! {
            "XObject" => dictionary! {},
        };

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        let mut pages = dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        };
        if inherit_resources {
            pages.set("Resources", image_resources);
        } else {
            page.set("Resources", image_resources);
        }
        let page_id = doc.add_object(page);
        pages.set("Kids", vec![Object::Reference(page_id)]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    fn chunk() -> ContentChunk {
        ContentChunk::from_words(
            &PageImage::new("p1.png", 1, 0),
            vec![RecognizedWord {
                text: "Hello".to_string(),
                bbox: BoundingBox::new(10, 10, 50, 30).unwrap(),
                confidence: None,
            }],
        )
    }

    fn font_registered(doc: &Document, page_id: ObjectId) -> bool {
        let resources = match inherited_attribute(doc, page_id, b"Resources").unwrap() {
            Some(Object::Reference(id)) => doc.get_object(id).unwrap().clone(),
            Some(obj) => obj,
            None => return false,
        };
        resources
            .as_dict()
            .and_then(|r| r.get(b"Font"))
            .and_then(Object::as_dict)
            .map(|fonts| fonts.has(FONT_RESOURCE_NAME))
            .unwrap_or(false)
    }

    #[test]
    fn test_inherited_media_box() {
        let (doc, page_id) = one_page_doc(false);
        assert_eq!(page_size_points(&doc, page_id).unwrap(), (612.0, 792.0));
    }

    #[test]
    fn test_apply_appends_invisible_text() {
        let (mut doc, page_id) = one_page_doc(false);
        let surface = PageSurface::new(1275, 1650, 612.0, 792.0).unwrap();

        let mode = apply_text_layer(&mut doc, page_id, &chunk(), &surface, &PlacementConfig::default())
            .unwrap();
        assert_eq!(mode, Some(PlacementMode::Geometric));
        assert!(font_registered(&doc, page_id));

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|o| o.operator.as_str()).collect();
        // Original drawing comes first
        assert_eq!(&operators[..2], &["q", "Q"]);
        let tr = content.operations.iter().find(|o| o.operator == "Tr").unwrap();
        assert_eq!(tr.operands[0].as_i64().unwrap(), 3);
        assert!(operators.contains(&"Tj"));
    }

    #[test]
    fn test_inherited_resources_are_kept() {
        let (mut doc, page_id) = one_page_doc(true);
        let surface = PageSurface::new(1275, 1650, 612.0, 792.0).unwrap();
        apply_text_layer(&mut doc, page_id, &chunk(), &surface, &PlacementConfig::default())
            .unwrap();

        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        assert!(resources.has(b"XObject"));
        assert!(font_registered(&doc, page_id));
    }

    #[test]
    fn test_empty_chunk_leaves_page_untouched() {
        let (mut doc, page_id) = one_page_doc(false);
        let surface = PageSurface::new(100, 100, 72.0, 72.0).unwrap();
        let before = doc.objects.len();
        let mode = apply_text_layer(
            &mut doc,
            page_id,
            &ContentChunk::empty(&PageImage::new("p.png", 1, 0)),
            &surface,
            &PlacementConfig::default(),
        )
        .unwrap();
        assert_eq!(mode, None);
        assert_eq!(doc.objects.len(), before);
    }
}
