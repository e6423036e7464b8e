//! # pdf-intake
//!
//! Turn an uploaded PDF resume into a validated, typed record.
//!
//! ## Why this crate?
//!
//! Uploaded resumes arrive in every shape: exported from a word processor
//! with a clean text layer, scanned on a phone, or designed in a layout tool
//! with text baked into images. Text extraction is cheap and exact when it
//! works; page images are robust when it doesn't. This crate classifies each
//! document first and picks the cheaper path when it can, falling back to
//! rendered pages when the text is unusable.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Validate  size limit + %PDF- signature
//!  ├─ 2. Classify  text density + image operators → TextDominant / ImageDominant / Hybrid / Unknown
//!  ├─ 3. Extract   text-showing operators, normalised            (text path)
//!  │               or ≤10 pages rendered at 2×, resized, JPEG    (image path)
//!  ├─ 4. Assemble  one artifact: text, images, or both
//!  └─ 5. Structure schema-constrained model call → StructuredRecord
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_intake::{process_input, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let result = process_input("resume.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&result.record)?);
//!     eprintln!("{} via {}", result.provenance.detected_kind, result.provenance.method);
//!     Ok(())
//! }
//! ```
//!
//! Classification and extraction run without any model provider:
//!
//! ```rust,no_run
//! use pdf_intake::{extract_document, ExtractionConfig, RawDocument};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = RawDocument::from_bytes(std::fs::read("resume.pdf")?);
//! let outcome = extract_document(&doc, &ExtractionConfig::default()).await?;
//! println!("{:?} → {}", outcome.verdict.kind, outcome.method());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-intake` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Runtime requirements
//!
//! The image path needs a pdfium shared library. Point `PDFIUM_LIB_PATH` (or
//! [`ExtractionConfigBuilder::pdfium_library_path`]) at it, or install it
//! where the system loader finds it. Text-only documents never touch pdfium.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ClassifierThresholds, ExtractionConfig, ExtractionConfigBuilder, PAGE_CAP};
pub use error::{
    AdapterError, ClassifyError, ExtractionError, PipelineError, RejectionReason, Stage,
};
pub use orchestrator::{
    extract_document, extract_document_sync, extract_input, process_document,
    process_document_sync, process_input,
};
pub use output::{
    CompressedImage, DocumentInfo, ExtractedArtifact, ExtractionMethod, ExtractionOutcome,
    ImageEncoding, ImageSet, ProcessedDocument, Provenance, StageTiming, TextArtifact,
};
pub use pipeline::cancel::CancelFlag;
pub use pipeline::classify::{classify, inspect, ClassificationVerdict, DocumentKind};
pub use pipeline::input::{load_document, validate, RawDocument, ValidationResult};
pub use pipeline::render::{PageRenderer, PageSink, PdfiumRenderer};
pub use pipeline::text::normalize;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use record::StructuredRecord;
