//! Artifacts and outcomes produced by the pipeline.
//!
//! Nothing here outlives a single request: the orchestrator owns the
//! artifact, hands it to the adapter, and the caller receives the
//! [`ProcessedDocument`] to persist however it likes.

use crate::error::Stage;
use crate::pipeline::classify::{ClassificationVerdict, DocumentKind};
use crate::record::StructuredRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image encodings the page renderer emits. Pages are always re-encoded
/// as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Jpeg,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }
}

/// One rendered, resized and re-encoded page.
#[derive(Clone, Serialize)]
pub struct CompressedImage {
    /// 1-indexed page number in the source document.
    pub page_num: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
}

impl CompressedImage {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for CompressedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedImage")
            .field("page_num", &self.page_num)
            .field("bytes", &self.data.len())
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Normalised document text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextArtifact {
    pub content: String,
    pub page_count: usize,
}

/// Rendered pages plus the size of the source document.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSet {
    pub pages: Vec<CompressedImage>,
    /// Pages attempted (`min(total, max_pages)`); failed pages are skipped in `pages`.
    pub page_count: usize,
    pub total_pages_in_document: usize,
}

impl ImageSet {
    /// True when the document had more pages than were rendered.
    pub fn is_truncated(&self) -> bool {
        self.total_pages_in_document > self.page_count
    }
}

/// What the extraction stages produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractedArtifact {
    Text(TextArtifact),
    Images(ImageSet),
    Mixed { text: TextArtifact, images: ImageSet },
}

impl ExtractedArtifact {
    pub fn method(&self) -> ExtractionMethod {
        match self {
            ExtractedArtifact::Text(_) => ExtractionMethod::Text,
            ExtractedArtifact::Images(_) => ExtractionMethod::Images,
            ExtractedArtifact::Mixed { .. } => ExtractionMethod::Mixed,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ExtractedArtifact::Text(t) | ExtractedArtifact::Mixed { text: t, .. } => {
                Some(&t.content)
            }
            ExtractedArtifact::Images(_) => None,
        }
    }

    pub fn images(&self) -> &[CompressedImage] {
        match self {
            ExtractedArtifact::Images(set) | ExtractedArtifact::Mixed { images: set, .. } => {
                &set.pages
            }
            ExtractedArtifact::Text(_) => &[],
        }
    }
}

/// How the content handed to the model was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Text,
    Images,
    Mixed,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMethod::Text => "text",
            ExtractionMethod::Images => "images",
            ExtractionMethod::Mixed => "mixed",
        })
    }
}

/// Wall-clock time spent in one orchestrator state.
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
}

/// Result of the extraction half of the pipeline (no model call).
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub verdict: ClassificationVerdict,
    pub artifact: ExtractedArtifact,
    /// States visited in order, ending with `Done`.
    pub states: Vec<Stage>,
    pub timings: Vec<StageTiming>,
    /// Pages whose content reached the artifact.
    pub pages_processed: usize,
    pub total_pages: usize,
    pub truncated: bool,
}

impl ExtractionOutcome {
    pub fn method(&self) -> ExtractionMethod {
        self.artifact.method()
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.states.contains(&stage)
    }
}

/// What the caller needs to persist alongside the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub filename: Option<String>,
    pub detected_kind: DocumentKind,
    pub method: ExtractionMethod,
    pub page_count: usize,
}

/// Full pipeline result: the validated record plus how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub record: StructuredRecord,
    pub provenance: Provenance,
    pub outcome: ExtractionOutcome,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Basic facts about a PDF, read without classifying or rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub pdf_version: String,
    pub encrypted: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(page: usize) -> CompressedImage {
        CompressedImage {
            page_num: page,
            data: vec![0xFF, 0xD8],
            encoding: ImageEncoding::Jpeg,
            width: 10,
            height: 20,
        }
    }

    #[test]
    fn artifact_accessors() {
        let text = TextArtifact {
            content: "hello".into(),
            page_count: 1,
        };
        let set = ImageSet {
            pages: vec![image(1)],
            page_count: 1,
            total_pages_in_document: 3,
        };
        assert!(set.is_truncated());

        let mixed = ExtractedArtifact::Mixed {
            text: text.clone(),
            images: set,
        };
        assert_eq!(mixed.method(), ExtractionMethod::Mixed);
        assert_eq!(mixed.text(), Some("hello"));
        assert_eq!(mixed.images().len(), 1);

        let plain = ExtractedArtifact::Text(text);
        assert!(plain.images().is_empty());
        assert_eq!(plain.method().to_string(), "text");
    }

    #[test]
    fn image_bytes_are_not_serialised() {
        let json = serde_json::to_value(image(2)).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["encoding"], "jpeg");
        assert_eq!(json["page_num"], 2);
    }
}
