//! Document loading and format validation.
//!
//! Everything downstream works on an in-memory [`RawDocument`]; nothing is
//! written to disk. Loading enforces the size ceiling *while* reading, so an
//! oversized file or an endless HTTP body is cut off at `max_file_size + 1`
//! bytes instead of being buffered whole.
//!
//! [`validate`] is the format validator proper: a pure check of length and
//! the `%PDF-` signature that never looks past a fixed-size prefix.

use crate::config::ExtractionConfig;
use crate::error::{PipelineError, RejectionReason};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The PDF file signature.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// An uploaded document: immutable bytes plus where they came from.
#[derive(Clone)]
pub struct RawDocument {
    bytes: Arc<[u8]>,
    declared_size: usize,
    filename: Option<String>,
}

impl RawDocument {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let declared_size = bytes.len();
        Self {
            bytes: Arc::from(bytes),
            declared_size,
            filename: None,
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap shared handle for blocking workers.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn declared_size(&self) -> usize {
        self.declared_size
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }
}

impl std::fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDocument")
            .field("declared_size", &self.declared_size)
            .field("filename", &self.filename)
            .finish()
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<RejectionReason>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: RejectionReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// Consume the result, turning a rejection into [`PipelineError::InvalidInput`].
    pub fn into_result(self) -> Result<(), PipelineError> {
        match self.reason {
            None => Ok(()),
            Some(reason) => Err(PipelineError::InvalidInput(reason)),
        }
    }
}

/// Check that `bytes` is a plausible PDF container.
///
/// Rejects empty buffers, buffers above `max_size`, and buffers that do not
/// start with `%PDF-`. Only the first few bytes are inspected.
pub fn validate(bytes: &[u8], max_size: usize) -> ValidationResult {
    if bytes.is_empty() {
        return ValidationResult::reject(RejectionReason::Empty);
    }
    if bytes.len() > max_size {
        return ValidationResult::reject(RejectionReason::TooLarge {
            size: bytes.len(),
            limit: max_size,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        let magic = bytes[..bytes.len().min(PDF_MAGIC.len())].to_vec();
        return ValidationResult::reject(RejectionReason::BadSignature { magic });
    }
    ValidationResult::ok()
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL into memory.
///
/// Honours `max_file_size` and `download_timeout_secs` from `config`.
pub async fn load_document(
    input: &str,
    config: &ExtractionConfig,
) -> Result<RawDocument, PipelineError> {
    let max_size = config.max_file_size;
    if is_url(input) {
        download_url(input, max_size, config.download_timeout_secs).await
    } else {
        read_local(Path::new(input), max_size).await
    }
}

async fn read_local(path: &Path, max_size: usize) -> Result<RawDocument, PipelineError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| io_error(path, e))?;
    let size = meta.len() as usize;
    if size > max_size {
        return Err(PipelineError::InvalidInput(RejectionReason::TooLarge {
            size,
            limit: max_size,
        }));
    }

    let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());

    let mut doc = RawDocument::from_bytes(bytes);
    if let Some(name) = path.file_name() {
        doc = doc.with_filename(name.to_string_lossy());
    }
    Ok(doc)
}

fn io_error(path: &Path, e: std::io::Error) -> PipelineError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => PipelineError::Internal(format!("Failed to read {}: {}", path.display(), e)),
    }
}

/// Download a URL into memory, stopping as soon as the body exceeds `max_size`.
async fn download_url(
    url: &str,
    max_size: usize,
    timeout_secs: u64,
) -> Result<RawDocument, PipelineError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let mut response = client.get(url).send().await.map_err(map_err)?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    if let Some(len) = response.content_length() {
        if len as usize > max_size {
            return Err(PipelineError::InvalidInput(RejectionReason::TooLarge {
                size: len as usize,
                limit: max_size,
            }));
        }
    }

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(map_err)? {
        body.extend_from_slice(&chunk);
        if body.len() > max_size {
            return Err(PipelineError::InvalidInput(RejectionReason::TooLarge {
                size: body.len(),
                limit: max_size,
            }));
        }
    }

    info!("Downloaded {} bytes", body.len());
    Ok(RawDocument::from_bytes(body).with_filename(filename_from_url(url)))
}

/// Extract a reasonable filename from the URL path.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/cv.pdf"));
        assert!(is_url("http://example.com/cv.pdf"));
        assert!(!is_url("/tmp/cv.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let r = validate(b"", 100);
        assert!(!r.valid);
        assert_eq!(r.reason, Some(RejectionReason::Empty));
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        let r = validate(b"%PDF-1.7 and then some", 10);
        assert_eq!(
            r.reason,
            Some(RejectionReason::TooLarge {
                size: 22,
                limit: 10
            })
        );
    }

    #[test]
    fn wrong_signature_is_rejected() {
        for junk in [&b"PK\x03\x04zipfile"[..], b"%PD", b"<html>", b" %PDF-1.4"] {
            let r = validate(junk, 1024);
            assert!(
                matches!(r.reason, Some(RejectionReason::BadSignature { .. })),
                "{junk:?} should be a bad signature"
            );
        }
    }

    #[test]
    fn pdf_header_is_accepted() {
        let r = validate(b"%PDF-1.4\n%garbage after the header is fine here", 1024);
        assert!(r.valid);
        assert!(r.clone().into_result().is_ok());
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://x.io/a/resume.pdf"), "resume.pdf");
        assert_eq!(filename_from_url("https://x.io/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn load_local_file_keeps_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.pdf");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"%PDF-1.4\n")
            .unwrap();

        let config = ExtractionConfig::builder().max_file_size(1024).build().unwrap();
        let doc = load_document(path.to_str().unwrap(), &config).await.unwrap();
        assert_eq!(doc.filename(), Some("cv.pdf"));
        assert_eq!(doc.declared_size(), 9);
        assert_eq!(doc.bytes(), b"%PDF-1.4\n");
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = load_document("/definitely/not/here.pdf", &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_rejects_oversized_file_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();

        let config = ExtractionConfig::builder().max_file_size(16).build().unwrap();
        let err = load_document(path.to_str().unwrap(), &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidInput(RejectionReason::TooLarge { size: 64, limit: 16 })
        ));
    }
}
