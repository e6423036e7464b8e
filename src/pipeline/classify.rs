//! Document classifier: text density and image operators → typed verdict.
//!
//! The verdict drives orchestrator routing only. Thresholds come from
//! [`ClassifierThresholds`]; the confidence values are fixed per rule.
//!
//! Rules, in order:
//!
//! | condition                                             | kind           | confidence |
//! |-------------------------------------------------------|----------------|-----------:|
//! | density > `text_dominant`, no image anywhere          | `TextDominant` | 0.9        |
//! | density ≤ `image_dominant_max`, images present        | `ImageDominant`| 0.9        |
//! | density > `hybrid_min`, images, density > `dense_text_override` | `TextDominant` | 0.7 |
//! | density > `hybrid_min`, images                        | `Hybrid`       | 0.8        |
//! | anything else, or any page failed to decode           | `Unknown`      | 0.5        |

use crate::config::{ClassifierThresholds, ExtractionConfig};
use crate::error::ClassifyError;
use crate::output::DocumentInfo;
use crate::pipeline::cancel::CancelFlag;
use crate::pipeline::content;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// What kind of content dominates the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    TextDominant,
    ImageDominant,
    Hybrid,
    Unknown,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::TextDominant => "text_dominant",
            DocumentKind::ImageDominant => "image_dominant",
            DocumentKind::Hybrid => "hybrid",
            DocumentKind::Unknown => "unknown",
        })
    }
}

/// Classifier output. Produced once per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationVerdict {
    pub kind: DocumentKind,
    /// Pages in the document (not just the sampled ones).
    pub page_count: usize,
    /// Characters per sampled page.
    pub text_density: f64,
    pub has_image_operators: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Confidence for a document with no pages.
const EMPTY_DOCUMENT_CONFIDENCE: f64 = 0.3;

/// Classify a validated PDF buffer.
///
/// Parses the object graph in memory; no file is created. Fails only when
/// the container cannot be opened at all, or with [`ClassifyError::Cancelled`]
/// once `cancel` is set. A page whose content stream cannot be decoded forces
/// `Unknown` instead of failing.
pub fn classify(
    bytes: &[u8],
    config: &ExtractionConfig,
    cancel: &CancelFlag,
) -> Result<ClassificationVerdict, ClassifyError> {
    let doc = content::open(bytes)?;
    let page_ids = content::page_ids(&doc);
    let page_count = page_ids.len();

    if page_count == 0 {
        warn!("Document has no pages");
        return Ok(ClassificationVerdict {
            kind: DocumentKind::Unknown,
            page_count: 0,
            text_density: 0.0,
            has_image_operators: false,
            confidence: EMPTY_DOCUMENT_CONFIDENCE,
        });
    }

    let sample = page_count.min(config.classify_sample_pages.max(1));
    if sample < page_count {
        debug!("Sampling {} of {} pages for classification", sample, page_count);
    }

    let mut total_chars = 0usize;
    let mut image_pages = 0usize;
    let mut partial_failure = false;

    for (idx, page_id) in page_ids.iter().take(sample).enumerate() {
        if cancel.is_cancelled() {
            debug!("Classification cancelled before page {}", idx + 1);
            return Err(ClassifyError::Cancelled);
        }
        match content::scan_page(&doc, *page_id) {
            Ok(scan) => {
                total_chars += scan.char_count();
                if scan.has_image {
                    image_pages += 1;
                }
            }
            Err(e) => {
                warn!("Page {} content could not be decoded: {}", idx + 1, e);
                partial_failure = true;
            }
        }
    }

    let text_density = total_chars as f64 / sample as f64;
    let has_image_operators = image_pages > 0;

    let (kind, confidence) = if partial_failure {
        (DocumentKind::Unknown, 0.5)
    } else {
        decide(text_density, has_image_operators, &config.thresholds)
    };

    info!(
        "Classified as {} (confidence {:.1}): {} pages, {:.1} chars/page, {} page(s) with images",
        kind, confidence, page_count, text_density, image_pages
    );

    Ok(ClassificationVerdict {
        kind,
        page_count,
        text_density,
        has_image_operators,
        confidence,
    })
}

/// Apply the density rules to already-measured signals.
pub fn decide(density: f64, has_images: bool, t: &ClassifierThresholds) -> (DocumentKind, f64) {
    if density > t.text_dominant && !has_images {
        (DocumentKind::TextDominant, 0.9)
    } else if density <= t.image_dominant_max && has_images {
        (DocumentKind::ImageDominant, 0.9)
    } else if density > t.hybrid_min && has_images {
        if density > t.dense_text_override {
            (DocumentKind::TextDominant, 0.7)
        } else {
            (DocumentKind::Hybrid, 0.8)
        }
    } else {
        (DocumentKind::Unknown, 0.5)
    }
}

/// Read basic document facts without classifying.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo, ClassifyError> {
    let doc = content::open(bytes)?;

    let info_dict = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|o| match o {
            lopdf::Object::Reference(id) => doc.get_dictionary(*id).ok(),
            lopdf::Object::Dictionary(d) => Some(d),
            _ => None,
        });

    let field = |key: &[u8]| -> Option<String> {
        info_dict?
            .get(key)
            .ok()
            .and_then(|v| lopdf::decode_text_string(v).ok())
            .filter(|s| !s.trim().is_empty())
    };

    Ok(DocumentInfo {
        page_count: doc.get_pages().len(),
        pdf_version: doc.version.clone(),
        encrypted: doc.trailer.get(b"Encrypt").is_ok(),
        title: field(b"Title"),
        author: field(b"Author"),
        producer: field(b"Producer"),
    })
}
