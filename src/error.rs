//! Error types for the pdf-intake pipeline.
//!
//! Errors come in two layers:
//!
//! * Stage errors ([`RejectionReason`], [`ClassifyError`], [`ExtractionError`],
//!   [`AdapterError`]) are what each component returns. Some of them are
//!   *recoverable inside the pipeline*: `InsufficientText` and
//!   `ExtractionTimeout` only tell the orchestrator to fall back to page
//!   rendering and never reach the caller on their own.
//!
//! * [`PipelineError`] is the terminal error returned by the top-level entry
//!   points. Every variant knows which [`Stage`] produced it, so a caller can
//!   build an actionable message without the pipeline knowing anything about
//!   HTTP status codes or UI.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The orchestrator states, also used to tag where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Validating,
    Classifying,
    ExtractingText,
    ExtractingImages,
    Assembling,
    Structuring,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Loading => "loading",
            Stage::Validating => "validating",
            Stage::Classifying => "classifying",
            Stage::ExtractingText => "extracting_text",
            Stage::ExtractingImages => "extracting_images",
            Stage::Assembling => "assembling",
            Stage::Structuring => "structuring",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Stage errors ─────────────────────────────────────────────────────────────

/// Why the format validator rejected a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum RejectionReason {
    #[error("the document is empty")]
    Empty,

    #[error("the document is {size} bytes, above the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    /// First bytes are not `%PDF-`.
    #[error("the document is not a PDF (first bytes: {magic:?})")]
    BadSignature { magic: Vec<u8> },
}

/// The classifier could not open the document's object graph.
#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    #[error("malformed PDF: {detail}")]
    Malformed { detail: String },

    #[error("PDF is encrypted and cannot be read: {detail}")]
    Encrypted { detail: String },

    #[error("classification exceeded its {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error("classification was cancelled")]
    Cancelled,
}

/// Failures of the text extractor and the page renderer.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// Normalised text is below the configured minimum.
    #[error("only {chars} characters of text extracted (minimum {min})")]
    InsufficientText { chars: usize, min: usize },

    #[error("text extraction exceeded its {budget_ms}ms budget")]
    ExtractionTimeout { budget_ms: u64 },

    /// Every page the renderer attempted failed.
    #[error("none of the {attempted} attempted pages could be rendered: {first_error}")]
    NoPagesRendered { attempted: usize, first_error: String },

    #[error("document could not be parsed for extraction: {detail}")]
    Malformed { detail: String },

    /// pdfium could not be bound.
    #[error(
        "page renderer unavailable: {detail}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib) to a directory containing the pdfium library."
    )]
    RendererUnavailable { detail: String },

    /// The work was stopped by its cancel flag before finishing.
    #[error("extraction was cancelled")]
    Cancelled,

    #[error("internal extraction error: {0}")]
    Internal(String),
}

impl ExtractionError {
    /// Whether the orchestrator should fall back to rendering instead of failing.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            ExtractionError::InsufficientText { .. }
                | ExtractionError::ExtractionTimeout { .. }
                | ExtractionError::Malformed { .. }
                | ExtractionError::Internal(_)
        )
    }
}

/// Failures of the structured-extraction adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The model's response does not have the minimal record shape.
    #[error("extraction response has the wrong shape: {detail}")]
    ShapeMismatch { detail: String },

    /// Upstream returned HTTP 429 or an equivalent signal.
    #[error("extraction capability '{provider}' is rate limiting requests")]
    UpstreamRateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("extraction capability timed out after {elapsed_ms}ms")]
    UpstreamTimeout { elapsed_ms: u64 },

    /// 401/403 or a rejected API key. Retrying will not help.
    #[error("extraction capability '{provider}' rejected the credential: {detail}")]
    UpstreamCredentialInvalid { provider: String, detail: String },

    #[error("extraction capability error: {message}")]
    Upstream { message: String },

    #[error("extraction provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },
}

impl AdapterError {
    /// Failures worth retrying with backoff inside the adapter.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::UpstreamRateLimited { .. } | AdapterError::UpstreamTimeout { .. }
        )
    }
}

// ── Terminal error ───────────────────────────────────────────────────────────

/// All terminal errors returned by the pdf-intake pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Loading ───────────────────────────────────────────────────────────
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Pipeline ──────────────────────────────────────────────────────────
    /// Rejected by the format validator. User-correctable, never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(RejectionReason),

    /// The container could not be parsed; likely corrupt or encrypted.
    #[error("{}", unreadable_message(.detail, .encrypted))]
    UnreadableDocument { detail: String, encrypted: bool },

    /// Both extraction strategies were exhausted.
    #[error("Document could not be processed: {source}")]
    UnprocessableDocument {
        #[source]
        source: ExtractionError,
    },

    /// The structured-extraction step failed.
    #[error("Structured extraction failed: {0}")]
    Extraction(#[from] AdapterError),

    // ── Config ────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn unreadable_message(detail: &str, encrypted: &bool) -> String {
    if *encrypted {
        format!("Document is encrypted ({detail}). Please upload an unencrypted copy.")
    } else {
        format!("Document is corrupt or unreadable: {detail}")
    }
}

impl From<ClassifyError> for PipelineError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::Malformed { detail } => PipelineError::UnreadableDocument {
                detail,
                encrypted: false,
            },
            ClassifyError::Encrypted { detail } => PipelineError::UnreadableDocument {
                detail,
                encrypted: true,
            },
            timeout @ ClassifyError::Timeout { .. } => PipelineError::UnreadableDocument {
                detail: timeout.to_string(),
                encrypted: false,
            },
            ClassifyError::Cancelled => {
                PipelineError::Internal("classification was cancelled".to_string())
            }
        }
    }
}

impl PipelineError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::FileNotFound { .. }
            | PipelineError::PermissionDenied { .. }
            | PipelineError::DownloadFailed { .. }
            | PipelineError::DownloadTimeout { .. } => Stage::Loading,
            PipelineError::InvalidInput(_) => Stage::Validating,
            PipelineError::UnreadableDocument { .. } => Stage::Classifying,
            PipelineError::UnprocessableDocument { .. } => Stage::ExtractingImages,
            PipelineError::Extraction(_) => Stage::Structuring,
            PipelineError::InvalidConfig(_) | PipelineError::Internal(_) => Stage::Failed,
        }
    }

    /// Whether the caller may retry the whole request.
    ///
    /// Rate limits and upstream timeouts warrant backoff-and-retry and a shape
    /// mismatch warrants a single retry. A rejected credential must be
    /// escalated to an operator. Everything else is fatal for this input.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Extraction(e) => matches!(
                e,
                AdapterError::UpstreamRateLimited { .. }
                    | AdapterError::UpstreamTimeout { .. }
                    | AdapterError::ShapeMismatch { .. }
            ),
            PipelineError::DownloadTimeout { .. } => true,
            _ => false,
        }
    }

    /// True when the failure is the user's to fix (bad file, encrypted, unreadable).
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidInput(_)
                | PipelineError::UnreadableDocument { .. }
                | PipelineError::FileNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display() {
        let e = PipelineError::InvalidInput(RejectionReason::TooLarge {
            size: 20,
            limit: 10,
        });
        let msg = e.to_string();
        assert!(msg.contains("20 bytes"), "got: {msg}");
        assert_eq!(e.stage(), Stage::Validating);
        assert!(!e.is_retryable());
        assert!(e.is_user_correctable());
    }

    #[test]
    fn encrypted_document_asks_for_unencrypted_copy() {
        let e: PipelineError = ClassifyError::Encrypted {
            detail: "no password".into(),
        }
        .into();
        assert!(e.to_string().contains("unencrypted"));
        assert_eq!(e.stage(), Stage::Classifying);
    }

    #[test]
    fn retry_policy_follows_error_kind() {
        let rate = PipelineError::Extraction(AdapterError::UpstreamRateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(30),
        });
        let timeout = PipelineError::Extraction(AdapterError::UpstreamTimeout { elapsed_ms: 100 });
        let shape = PipelineError::Extraction(AdapterError::ShapeMismatch {
            detail: "no profile".into(),
        });
        let cred = PipelineError::Extraction(AdapterError::UpstreamCredentialInvalid {
            provider: "openai".into(),
            detail: "bad key".into(),
        });
        assert!(rate.is_retryable());
        assert!(timeout.is_retryable());
        assert!(shape.is_retryable());
        assert!(!cred.is_retryable());
        assert_eq!(cred.stage(), Stage::Structuring);
    }

    #[test]
    fn fallback_errors_are_recoverable() {
        assert!(ExtractionError::InsufficientText { chars: 3, min: 50 }.triggers_fallback());
        assert!(ExtractionError::ExtractionTimeout { budget_ms: 30_000 }.triggers_fallback());
        assert!(!ExtractionError::NoPagesRendered {
            attempted: 2,
            first_error: "x".into()
        }
        .triggers_fallback());
        assert!(!ExtractionError::Cancelled.triggers_fallback());
    }

    #[test]
    fn classification_timeout_is_unreadable() {
        let e: PipelineError = ClassifyError::Timeout { budget_ms: 30_000 }.into();
        assert!(matches!(
            e,
            PipelineError::UnreadableDocument { encrypted: false, .. }
        ));
        assert!(e.to_string().contains("30000ms"));
    }

    #[test]
    fn unprocessable_keeps_source() {
        let e = PipelineError::UnprocessableDocument {
            source: ExtractionError::NoPagesRendered {
                attempted: 3,
                first_error: "bitmap".into(),
            },
        };
        assert!(e.to_string().contains("3 attempted pages"));
        assert_eq!(e.stage(), Stage::ExtractingImages);
    }
}
