//! Text extraction from text-showing operators.
//!
//! Each page's operator strings are joined with single spaces, pages are
//! joined with a blank line, and the result is normalised. There is no
//! layout or column reconstruction; reading order is content-stream order.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::output::TextArtifact;
use crate::pipeline::cancel::CancelFlag;
use crate::pipeline::content;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static RE_SPACE_AROUND_NL: Lazy<Regex> = Lazy::new(|| Regex::new(r" ?\n ?").unwrap());
static RE_EXCESS_NL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalise extracted text.
///
/// 1. CR and CRLF become LF
/// 2. control characters other than LF and TAB are removed
/// 3. runs of horizontal whitespace collapse to one space
/// 4. spaces touching a newline are dropped
/// 5. three or more newlines collapse to two
/// 6. leading and trailing whitespace is trimmed
///
/// Applying it twice gives the same result as applying it once.
pub fn normalize(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let printable: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let s = RE_HSPACE.replace_all(&printable, " ");
    let s = RE_SPACE_AROUND_NL.replace_all(&s, "\n");
    let s = RE_EXCESS_NL.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Extract and normalise all page text. Blocking; CPU-bound.
///
/// Returns [`ExtractionError::Cancelled`] at the next page once `cancel` is set.
pub fn extract_text_blocking(
    bytes: &[u8],
    min_chars: usize,
    cancel: &CancelFlag,
) -> Result<TextArtifact, ExtractionError> {
    let doc = content::open(bytes).map_err(|e| ExtractionError::Malformed {
        detail: e.to_string(),
    })?;

    let page_ids = content::page_ids(&doc);
    let mut pages: Vec<String> = Vec::with_capacity(page_ids.len());

    for (idx, page_id) in page_ids.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Text extraction cancelled before page {}", idx + 1);
            return Err(ExtractionError::Cancelled);
        }
        match content::scan_page(&doc, *page_id) {
            Ok(scan) => pages.push(scan.text()),
            Err(e) => {
                warn!("Skipping text of page {}: {}", idx + 1, e);
                pages.push(String::new());
            }
        }
    }

    let joined = pages.join("\n\n");
    let normalized = normalize(&joined);
    let chars = normalized.chars().count();
    debug!("Extracted {} characters from {} pages", chars, page_ids.len());

    if chars < min_chars {
        return Err(ExtractionError::InsufficientText {
            chars,
            min: min_chars,
        });
    }

    Ok(TextArtifact {
        content: normalized,
        page_count: page_ids.len(),
    })
}

/// Extract text on the blocking pool under the configured wall-clock budget.
///
/// The blocking task stops at its next page when the budget expires or when
/// this future is dropped.
pub async fn extract_text(
    bytes: Arc<[u8]>,
    config: &ExtractionConfig,
) -> Result<TextArtifact, ExtractionError> {
    let min_chars = config.min_text_chars;
    let budget = config.text_timeout;
    let cancel = CancelFlag::new();
    let _guard = cancel.cancel_on_drop();

    let worker = cancel.clone();
    let task =
        tokio::task::spawn_blocking(move || extract_text_blocking(&bytes, min_chars, &worker));

    match tokio::time::timeout(budget, task).await {
        Ok(joined) => {
            joined.map_err(|e| ExtractionError::Internal(format!("Text task panicked: {}", e)))?
        }
        Err(_) => {
            cancel.cancel();
            Err(ExtractionError::ExtractionTimeout {
                budget_ms: budget.as_millis() as u64,
            })
        }
    }
}
