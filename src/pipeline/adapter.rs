//! Structured-extraction adapter: artifact → model call → validated record.
//!
//! Prompt wording lives in [`crate::prompts`] and the record contract in
//! [`crate::schema`]. This module assembles the request, retries transient
//! failures, and refuses responses without the minimal record shape.
//!
//! ## Retry Strategy
//!
//! Rate limits and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^(retry - 1)`). A rejected credential or a malformed
//! response is returned immediately.

use crate::config::ExtractionConfig;
use crate::error::AdapterError;
use crate::output::ExtractedArtifact;
use crate::pipeline::encode::to_image_data;
use crate::prompts::{self, IMAGES_INSTRUCTION, MIXED_INSTRUCTION, TEXT_INSTRUCTION};
use crate::record::StructuredRecord;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// A validated record plus the cost of obtaining it.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub record: StructuredRecord,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Calls made, including the successful one.
    pub attempts: u32,
}

/// Build the chat request for an artifact.
///
/// ## Message Layout
///
/// 1. **System message** — extraction rules followed by the JSON Schema
/// 2. **User message** — the instruction for this artifact kind, the quoted
///    document text (text and mixed artifacts), and the page images in page
///    order (image and mixed artifacts)
pub fn build_messages(artifact: &ExtractedArtifact, config: &ExtractionConfig) -> Vec<ChatMessage> {
    let system = prompts::system_message(config.system_prompt.as_deref());

    let user = match artifact {
        ExtractedArtifact::Text(text) => ChatMessage::user_with_images(
            &prompts::text_message(TEXT_INSTRUCTION, &text.content),
            Vec::new(),
        ),
        ExtractedArtifact::Images(set) => ChatMessage::user_with_images(
            IMAGES_INSTRUCTION,
            set.pages.iter().map(to_image_data).collect(),
        ),
        ExtractedArtifact::Mixed { text, images } => ChatMessage::user_with_images(
            &prompts::text_message(MIXED_INSTRUCTION, &text.content),
            images.pages.iter().map(to_image_data).collect(),
        ),
    };

    vec![ChatMessage::system(&system), user]
}

fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Send the artifact to the extraction capability and validate the reply.
///
/// `provider_label` only appears in errors and logs.
pub async fn extract_record(
    provider: &Arc<dyn LLMProvider>,
    provider_label: &str,
    artifact: &ExtractedArtifact,
    config: &ExtractionConfig,
) -> Result<AdapterResponse, AdapterError> {
    let messages = build_messages(artifact, config);
    let options = build_options(config);
    let call_timeout = config.api_timeout;

    let mut attempt: u32 = 0;
    loop {
        let started = Instant::now();
        let outcome = tokio::time::timeout(call_timeout, provider.chat(&messages, Some(&options))).await;

        let err = match outcome {
            Ok(Ok(response)) => {
                debug!(
                    "Extraction call: {} input tokens, {} output tokens, {:?}",
                    response.prompt_tokens,
                    response.completion_tokens,
                    started.elapsed()
                );
                let record = parse_record(&response.content)?;
                info!(
                    "Structured record extracted via {} ({} experience, {} education entries)",
                    artifact.method(),
                    record.experience.len(),
                    record.education.len()
                );
                return Ok(AdapterResponse {
                    record,
                    input_tokens: response.prompt_tokens as u64,
                    output_tokens: response.completion_tokens as u64,
                    attempts: attempt + 1,
                });
            }
            Ok(Err(e)) => classify_upstream_error(provider_label, &e.to_string()),
            Err(_) => AdapterError::UpstreamTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        };

        if !err.is_transient() || attempt >= config.max_retries {
            return Err(err);
        }

        attempt += 1;
        let backoff = backoff_ms(config.retry_backoff_ms, attempt, &err);
        warn!(
            "Extraction attempt {} failed ({}); retry {}/{} after {}ms",
            attempt, err, attempt, config.max_retries, backoff
        );
        sleep(Duration::from_millis(backoff)).await;
    }
}

/// Delay before retry number `attempt` (1-based). Honours an upstream
/// `Retry-After` when it asks for longer.
fn backoff_ms(base: u64, attempt: u32, err: &AdapterError) -> u64 {
    let exp = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    match err {
        AdapterError::UpstreamRateLimited {
            retry_after_secs: Some(secs),
            ..
        } => exp.max(secs.saturating_mul(1000)),
        _ => exp,
    }
}

/// Map an upstream error message to an [`AdapterError`].
///
/// Provider errors arrive as strings, so the classification works on their
/// signatures: HTTP status codes and well-known phrases.
pub fn classify_upstream_error(provider: &str, message: &str) -> AdapterError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
    {
        return AdapterError::UpstreamRateLimited {
            provider: provider.to_string(),
            retry_after_secs: parse_retry_after(&lower),
        };
    }

    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("authentication")
    {
        return AdapterError::UpstreamCredentialInvalid {
            provider: provider.to_string(),
            detail: message.to_string(),
        };
    }

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("504") {
        return AdapterError::UpstreamTimeout { elapsed_ms: 0 };
    }

    AdapterError::Upstream {
        message: message.to_string(),
    }
}

/// Pull "retry after N" seconds out of an error message, if present.
fn parse_retry_after(lower: &str) -> Option<u64> {
    let idx = lower.find("retry after").or_else(|| lower.find("retry-after"))?;
    lower[idx + "retry after".len()..]
        .trim_start_matches([':', ' '])
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|n| n.parse().ok())
}

/// Strip a surrounding Markdown code fence, if the model added one.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse and shape-check a model response.
///
/// The response must be a JSON object with an object `profile` and array
/// `experience` and `education`. Other lists may be missing and default to
/// empty. Out-of-vocabulary enum values are coerced to null during
/// deserialisation.
pub fn parse_record(raw: &str) -> Result<StructuredRecord, AdapterError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| AdapterError::ShapeMismatch {
        detail: format!("response is not valid JSON: {}", e),
    })?;
    check_shape(&value)?;
    serde_json::from_value(value).map_err(|e| AdapterError::ShapeMismatch {
        detail: e.to_string(),
    })
}

fn check_shape(value: &Value) -> Result<(), AdapterError> {
    let obj = value.as_object().ok_or_else(|| AdapterError::ShapeMismatch {
        detail: "response is not a JSON object".to_string(),
    })?;

    let mismatch = |detail: &str| AdapterError::ShapeMismatch {
        detail: detail.to_string(),
    };

    match obj.get("profile") {
        Some(Value::Object(_)) => {}
        Some(_) => return Err(mismatch("`profile` is not an object")),
        None => return Err(mismatch("missing required field `profile`")),
    }
    for field in ["experience", "education"] {
        match obj.get(field) {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(mismatch(&format!("`{field}` is not an array"))),
            None => return Err(mismatch(&format!("missing required field `{field}`"))),
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::scripted::{Reply, ScriptedProvider};
    use super::*;
    use crate::output::{CompressedImage, ImageEncoding, ImageSet, TextArtifact};
    use crate::record::EmploymentType;
    use edgequake_llm::LlmError;

    fn text_artifact() -> ExtractedArtifact {
        ExtractedArtifact::Text(TextArtifact {
            content: "Jane Doe\nSoftware Engineer at Acme".into(),
            page_count: 1,
        })
    }

    fn retrying(max_retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(0)
            .build()
            .unwrap()
    }

    async fn run(
        replies: Vec<Reply>,
        config: &ExtractionConfig,
    ) -> (Result<AdapterResponse, AdapterError>, u32) {
        let scripted = Arc::new(ScriptedProvider::new(replies));
        let provider: Arc<dyn LLMProvider> = scripted.clone();
        let result = extract_record(&provider, "scripted", &text_artifact(), config).await;
        (result, scripted.calls())
    }

    const MINIMAL: &str = r#"{"profile": {"full_name": "Jane Doe"}, "experience": [], "education": []}"#;

    #[test]
    fn minimal_record_parses() {
        let r = parse_record(MINIMAL).unwrap();
        assert_eq!(r.profile.full_name.as_deref(), Some("Jane Doe"));
        assert!(r.skills.is_empty());
    }

    #[test]
    fn fenced_response_is_accepted() {
        let raw = format!("```json\n{MINIMAL}\n```");
        assert!(parse_record(&raw).is_ok());
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn missing_experience_is_shape_mismatch() {
        let err = parse_record(r#"{"profile": {}, "education": []}"#).unwrap_err();
        assert!(matches!(err, AdapterError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("experience"));
    }

    #[test]
    fn wrong_types_are_shape_mismatch() {
        for raw in [
            "[]",
            "not json",
            r#"{"profile": "Jane", "experience": [], "education": []}"#,
            r#"{"profile": {}, "experience": {}, "education": []}"#,
        ] {
            assert!(
                matches!(parse_record(raw), Err(AdapterError::ShapeMismatch { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_enum_values_become_null() {
        let raw = r#"{
            "profile": {},
            "experience": [
                {"company": "Acme", "employment_type": "Full-Time"},
                {"company": "Initech", "employment_type": "gig"}
            ],
            "education": []
        }"#;
        let r = parse_record(raw).unwrap();
        assert_eq!(r.experience[0].employment_type, Some(EmploymentType::FullTime));
        assert_eq!(r.experience[1].employment_type, None);
    }

    #[test]
    fn upstream_errors_are_classified() {
        assert!(matches!(
            classify_upstream_error("openai", "HTTP 429 Too Many Requests, retry after 12s"),
            AdapterError::UpstreamRateLimited {
                retry_after_secs: Some(12),
                ..
            }
        ));
        assert!(matches!(
            classify_upstream_error("openai", "401 Unauthorized: invalid api key"),
            AdapterError::UpstreamCredentialInvalid { .. }
        ));
        assert!(matches!(
            classify_upstream_error("openai", "request timed out"),
            AdapterError::UpstreamTimeout { .. }
        ));
        assert!(matches!(
            classify_upstream_error("openai", "model exploded"),
            AdapterError::Upstream { .. }
        ));
    }

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let timeout = AdapterError::UpstreamTimeout { elapsed_ms: 0 };
        assert_eq!(backoff_ms(500, 1, &timeout), 500);
        assert_eq!(backoff_ms(500, 3, &timeout), 2000);
        let limited = AdapterError::UpstreamRateLimited {
            provider: "x".into(),
            retry_after_secs: Some(5),
        };
        assert_eq!(backoff_ms(500, 1, &limited), 5000);
    }

    #[test]
    fn messages_follow_artifact_kind() {
        let config = ExtractionConfig::default();
        let text = ExtractedArtifact::Text(TextArtifact {
            content: "Jane Doe".into(),
            page_count: 1,
        });
        let msgs = build_messages(&text, &config);
        assert_eq!(msgs.len(), 2);

        let page = CompressedImage {
            page_num: 1,
            data: vec![0xFF, 0xD8, 0xFF],
            encoding: ImageEncoding::Jpeg,
            width: 1,
            height: 1,
        };
        let images = ExtractedArtifact::Images(ImageSet {
            pages: vec![page.clone(), page],
            page_count: 2,
            total_pages_in_document: 2,
        });
        let msgs = build_messages(&images, &config);
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn rate_limits_are_retried_up_to_max_retries() {
        let replies = (0..5)
            .map(|_| Reply::Fail(LlmError::RateLimited("429 slow down".into())))
            .collect();
        let (result, calls) = run(replies, &retrying(2)).await;
        assert!(matches!(result, Err(AdapterError::UpstreamRateLimited { .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let replies = vec![
            Reply::Fail(LlmError::Timeout),
            Reply::Fail(LlmError::RateLimited("too many requests".into())),
            Reply::Content(MINIMAL),
        ];
        let (result, calls) = run(replies, &retrying(2)).await;
        let response = result.unwrap();
        assert_eq!(response.attempts, 3);
        assert_eq!(response.input_tokens, 120);
        assert_eq!(response.output_tokens, 40);
        assert_eq!(response.record.profile.full_name.as_deref(), Some("Jane Doe"));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn rejected_credential_is_returned_after_one_call() {
        let replies = vec![
            Reply::Fail(LlmError::AuthError("invalid api key".into())),
            Reply::Content(MINIMAL),
        ];
        let (result, calls) = run(replies, &retrying(3)).await;
        assert!(matches!(
            result,
            Err(AdapterError::UpstreamCredentialInvalid { .. })
        ));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn malformed_response_is_returned_after_one_call() {
        let replies = vec![Reply::Content("Sorry, I cannot help."), Reply::Content(MINIMAL)];
        let (result, calls) = run(replies, &retrying(3)).await;
        assert!(matches!(result, Err(AdapterError::ShapeMismatch { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn other_upstream_errors_are_not_retried() {
        let replies = vec![Reply::Fail(LlmError::ApiError("model exploded".into()))];
        let (result, calls) = run(replies, &retrying(3)).await;
        assert!(matches!(result, Err(AdapterError::Upstream { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn hung_call_hits_the_api_timeout() {
        let config = ExtractionConfig::builder()
            .max_retries(0)
            .api_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let (result, calls) = run(vec![Reply::Hang], &config).await;
        match result {
            Err(AdapterError::UpstreamTimeout { elapsed_ms }) => assert!(elapsed_ms >= 50),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn hung_call_is_retried_as_a_timeout() {
        let config = ExtractionConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(0)
            .api_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let (result, calls) = run(vec![Reply::Hang, Reply::Content(MINIMAL)], &config).await;
        assert_eq!(result.unwrap().attempts, 2);
        assert_eq!(calls, 2);
    }
}
