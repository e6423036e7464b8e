//! Page content-stream walking over an in-memory lopdf document.
//!
//! Both the classifier and the text extractor need the same two signals from
//! a page: the strings passed to text-showing operators and whether any
//! operator paints a raster. This module decodes a page once and answers
//! both.
//!
//! Text-showing operators: `Tj`, `TJ`, `'` and `"`. Operand bytes are
//! decoded through the encoding of the font selected by the last `Tf`
//! (simple encodings, or a `ToUnicode` CMap for composite fonts). Text in a
//! font lopdf cannot decode is dropped, so it counts for nothing.
//!
//! Image-painting operators: `Do` on an image XObject, and inline images
//! (`BI … ID … EI`). `Do` on a form XObject walks the form's own content.

use crate::error::ClassifyError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use tracing::debug;

/// `TJ` adjustments more negative than this (thousandths of an em) are
/// treated as a word gap.
const TJ_SPACE_THRESHOLD: f32 = -100.0;

/// Parent-chain depth limit when resolving inherited page resources.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Nesting limit for form XObjects drawn from other forms.
const MAX_FORM_DEPTH: usize = 8;

/// Parse bytes into a lopdf document, mapping failures to classifier errors.
///
/// A document without a catalog is treated as malformed even if lopdf
/// accepted its cross-reference table.
pub fn open(bytes: &[u8]) -> Result<Document, ClassifyError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        let detail = e.to_string();
        if detail.to_ascii_lowercase().contains("ncrypt")
            || detail.to_ascii_lowercase().contains("decrypt")
        {
            ClassifyError::Encrypted { detail }
        } else {
            ClassifyError::Malformed { detail }
        }
    })?;

    if doc.catalog().is_err() {
        return Err(ClassifyError::Malformed {
            detail: "document has no catalog (trailer /Root)".to_string(),
        });
    }
    Ok(doc)
}

/// Page object ids in page order.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    // get_pages() is keyed by 1-based page number, so BTreeMap order is page order.
    doc.get_pages().into_values().collect()
}

/// Signals read from a single page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageScan {
    /// Decoded strings from text-showing operators, one entry per operator.
    pub fragments: Vec<String>,
    /// True when any operator paints an image.
    pub has_image: bool,
}

impl PageScan {
    /// Characters across all fragments, counted after decoding.
    pub fn char_count(&self) -> usize {
        self.fragments.iter().map(|f| f.chars().count()).sum()
    }

    /// Operator strings joined with single spaces.
    pub fn text(&self) -> String {
        self.fragments.join(" ")
    }
}

/// Decode a page's content streams and collect its text and image signals.
pub fn scan_page(doc: &Document, page_id: ObjectId) -> Result<PageScan, lopdf::Error> {
    let operations = page_operations(doc, page_id)?;
    let resources = page_resources(doc, page_id);

    let mut scan = PageScan::default();
    walk(doc, resources, &operations, 0, &mut scan);
    Ok(scan)
}

/// Decoded operations of a page's (possibly multi-stream) content.
pub fn page_operations(doc: &Document, page_id: ObjectId) -> Result<Vec<Operation>, lopdf::Error> {
    let data = doc.get_page_content(page_id)?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let content = Content::decode(&data)?;
    Ok(content.operations)
}

fn walk(
    doc: &Document,
    resources: Option<&Dictionary>,
    operations: &[Operation],
    depth: usize,
    scan: &mut PageScan,
) {
    let fonts = font_encodings(doc, resources);
    let mut font: Option<&Encoding> = None;

    for op in operations {
        match op.operator.as_str() {
            "Tf" => {
                font = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| fonts.get(name));
            }
            "BI" | "ID" | "EI" => scan.has_image = true,
            "Do" => {
                let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                match xobject(doc, resources, name) {
                    Some(stream) => match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                        Ok(b"Image") => scan.has_image = true,
                        Ok(b"Form") => walk_form(doc, stream, resources, depth, scan),
                        _ => {}
                    },
                    // Unresolvable XObjects are counted: a scanner-produced page
                    // with a broken resource dictionary is still a raster page.
                    None => scan.has_image = true,
                }
            }
            _ => {
                let Some(encoding) = font else { continue };
                if let Some(text) = operation_text(op, encoding) {
                    if !text.is_empty() {
                        scan.fragments.push(text);
                    }
                }
            }
        }
    }
}

/// Walk a form XObject's content with its own resources, or the caller's
/// when it has none.
fn walk_form(
    doc: &Document,
    form: &Stream,
    parent: Option<&Dictionary>,
    depth: usize,
    scan: &mut PageScan,
) {
    if depth >= MAX_FORM_DEPTH {
        debug!("Form XObjects nested deeper than {MAX_FORM_DEPTH} levels; not descending");
        return;
    }
    let operations = match form
        .get_plain_content()
        .and_then(|data| Content::decode(&data))
    {
        Ok(content) => content.operations,
        Err(e) => {
            debug!("Form XObject content could not be decoded: {}", e);
            return;
        }
    };
    let resources = form
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .or(parent);
    walk(doc, resources, &operations, depth + 1, scan);
}

/// Encodings of the fonts named in `resources`, keyed by resource name.
///
/// Fonts whose encoding lopdf cannot build (for example `Identity-H`
/// without a `ToUnicode` map) are left out.
fn font_encodings<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
) -> BTreeMap<Vec<u8>, Encoding<'a>> {
    let mut out = BTreeMap::new();
    let Some(fonts) = resources
        .and_then(|r| r.get(b"Font").ok())
        .and_then(|o| resolve_dict(doc, o))
    else {
        return out;
    };
    for (name, obj) in fonts.iter() {
        let Some(font) = resolve_dict(doc, obj) else {
            continue;
        };
        match font.get_font_encoding(doc) {
            Ok(encoding) => {
                out.insert(name.clone(), encoding);
            }
            Err(e) => debug!(
                "Font /{} has no usable encoding: {}",
                String::from_utf8_lossy(name),
                e
            ),
        }
    }
    out
}

/// Text shown by a single operator, decoded with `encoding`, or `None` if
/// the operator is not text-showing.
pub fn operation_text(op: &Operation, encoding: &Encoding) -> Option<String> {
    match op.operator.as_str() {
        "Tj" | "'" => op.operands.first().map(|o| decode_operand(o, encoding)),
        // `"` takes word spacing, char spacing, then the string.
        "\"" => op.operands.get(2).map(|o| decode_operand(o, encoding)),
        "TJ" => {
            let items = op.operands.first()?.as_array().ok()?;
            let mut out = String::new();
            for item in items {
                match item {
                    Object::String(..) => out.push_str(&decode_operand(item, encoding)),
                    Object::Integer(n) if (*n as f32) < TJ_SPACE_THRESHOLD => {
                        push_gap(&mut out)
                    }
                    Object::Real(n) if *n < TJ_SPACE_THRESHOLD => push_gap(&mut out),
                    _ => {}
                }
            }
            Some(out)
        }
        _ => None,
    }
}

fn push_gap(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

/// Decode a string operand. Codes the font does not map are dropped.
fn decode_operand(obj: &Object, encoding: &Encoding) -> String {
    let Object::String(bytes, _) = obj else {
        return String::new();
    };
    match Document::decode_text(encoding, bytes) {
        Ok(text) => text.chars().filter(|c| *c != char::REPLACEMENT_CHARACTER).collect(),
        Err(e) => {
            debug!("Dropping undecodable string operand: {}", e);
            String::new()
        }
    }
}

/// Follow a reference, if `obj` is one.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// The page's `/Resources`, following `/Parent` inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Some(res) = node.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o)) {
            return Some(res);
        }
        node = node
            .get(b"Parent")
            .ok()
            .and_then(|o| resolve_dict(doc, o))?;
    }
    debug!("Resource inheritance deeper than {MAX_INHERITANCE_DEPTH} levels");
    None
}

fn xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> Option<&'a Stream> {
    let xobjects = resolve_dict(doc, resources?.get(b"XObject").ok()?)?;
    resolve(doc, xobjects.get(name).ok()?)?.as_stream().ok()
}
