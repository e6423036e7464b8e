//! Extraction orchestrator: the per-document state machine and entry points.
//!
//! ```text
//! Validating ─▶ Classifying ─┬─▶ ExtractingText ──┬────────────────▶ Assembling ─▶ [Structuring] ─▶ Done
//!                            │                    └─(too little)─┐      ▲
//!                            └─(image dominant)──────────────────┴─▶ ExtractingImages
//! any state ─▶ Failed
//! ```
//!
//! Routing by verdict:
//!
//! * `TextDominant` / `Hybrid`: text first; accepted with at least
//!   `text_first_min_chars`, otherwise fall back to rendering.
//! * `ImageDominant`: render directly; text extraction is skipped.
//! * `Unknown`: text first; accepted with at least `unknown_min_chars`.
//!
//! A rendering failure after the fallback is terminal. Every state entered
//! is recorded in the outcome and reported to the progress callback.
//!
//! Each call owns its own [`Run`]; nothing is shared between documents, so
//! independent documents can be processed concurrently.
//!
//! Classification, text extraction and rendering run on the blocking pool
//! under a cancel flag. Exceeding a budget or dropping the entry-point
//! future stops that work at the next page.

use crate::config::ExtractionConfig;
use crate::error::{AdapterError, ClassifyError, PipelineError, Stage};
use crate::output::{
    ExtractedArtifact, ExtractionOutcome, ImageSet, ProcessedDocument, Provenance, StageTiming,
    TextArtifact,
};
use crate::pipeline::adapter;
use crate::pipeline::cancel::CancelFlag;
use crate::pipeline::classify::{self, ClassificationVerdict, DocumentKind};
use crate::pipeline::input::{self, RawDocument};
use crate::pipeline::{render, text};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// State bookkeeping for one document.
struct Run<'a> {
    config: &'a ExtractionConfig,
    states: Vec<Stage>,
    timings: Vec<StageTiming>,
    current: Option<(Stage, Instant)>,
}

impl<'a> Run<'a> {
    fn new(config: &'a ExtractionConfig) -> Self {
        Self {
            config,
            states: Vec::new(),
            timings: Vec::new(),
            current: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.close_current();
        debug!("→ {}", stage);
        self.states.push(stage);
        self.current = Some((stage, Instant::now()));
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage(stage);
        }
    }

    fn close_current(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            self.timings.push(StageTiming {
                stage,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    /// Enter `Failed` and hand the error back.
    fn fail(&mut self, err: PipelineError) -> PipelineError {
        warn!("Pipeline failed in {}: {}", err.stage(), err);
        self.enter(Stage::Failed);
        self.close_current();
        err
    }

    /// Enter `Done` and produce the outcome.
    fn finish(mut self, extracted: Extracted) -> ExtractionOutcome {
        self.enter(Stage::Done);
        self.close_current();
        let method = extracted.artifact.method();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_complete(method);
        }
        ExtractionOutcome {
            verdict: extracted.verdict,
            artifact: extracted.artifact,
            states: self.states,
            timings: self.timings,
            pages_processed: extracted.pages_processed,
            total_pages: extracted.total_pages,
            truncated: extracted.truncated,
        }
    }
}

/// Output of the Validating → Assembling half.
struct Extracted {
    verdict: ClassificationVerdict,
    artifact: ExtractedArtifact,
    pages_processed: usize,
    total_pages: usize,
    truncated: bool,
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Validate, classify and extract a document without calling the model.
///
/// # Errors
/// * [`PipelineError::InvalidInput`] — empty, too large, or not a PDF
/// * [`PipelineError::UnreadableDocument`] — corrupt or encrypted container
/// * [`PipelineError::UnprocessableDocument`] — text was unusable and no
///   page could be rendered
pub async fn extract_document(
    doc: &RawDocument,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, PipelineError> {
    let mut run = Run::new(config);
    let extracted = run_extraction(doc, config, &mut run).await?;
    Ok(run.finish(extracted))
}

/// Run the whole pipeline: extraction followed by structured extraction.
///
/// The provider is resolved only once an artifact exists, so invalid or
/// unreadable uploads are rejected without any provider configuration.
///
/// # Example
/// ```rust,no_run
/// use pdf_intake::{process_document, ExtractionConfig, RawDocument};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("resume.pdf")?;
/// let doc = RawDocument::from_bytes(bytes).with_filename("resume.pdf");
/// let result = process_document(&doc, &ExtractionConfig::default()).await?;
/// println!("{:?} via {}", result.record.profile.full_name, result.provenance.method);
/// # Ok(())
/// # }
/// ```
pub async fn process_document(
    doc: &RawDocument,
    config: &ExtractionConfig,
) -> Result<ProcessedDocument, PipelineError> {
    let mut run = Run::new(config);
    let (extracted, response, started) = process_with(doc, config, &mut run).await?;
    Ok(build_processed(doc, run, extracted, response, started))
}

/// Load from a path or URL, then [`extract_document`].
pub async fn extract_input(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, PipelineError> {
    let mut run = Run::new(config);
    let doc = load(input_str.as_ref(), config, &mut run).await?;
    let extracted = run_extraction(&doc, config, &mut run).await?;
    Ok(run.finish(extracted))
}

/// Load from a path or URL, then [`process_document`].
pub async fn process_input(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ProcessedDocument, PipelineError> {
    let mut run = Run::new(config);
    let doc = load(input_str.as_ref(), config, &mut run).await?;
    let (extracted, response, started) = process_with(&doc, config, &mut run).await?;
    Ok(build_processed(&doc, run, extracted, response, started))
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_document_sync(
    doc: &RawDocument,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, PipelineError> {
    runtime()?.block_on(extract_document(doc, config))
}

/// Synchronous wrapper around [`process_document`].
pub fn process_document_sync(
    doc: &RawDocument,
    config: &ExtractionConfig,
) -> Result<ProcessedDocument, PipelineError> {
    runtime()?.block_on(process_document(doc, config))
}

fn runtime() -> Result<tokio::runtime::Runtime, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))
}

// ── State machine ────────────────────────────────────────────────────────

async fn load(
    input_str: &str,
    config: &ExtractionConfig,
    run: &mut Run<'_>,
) -> Result<RawDocument, PipelineError> {
    run.enter(Stage::Loading);
    input::load_document(input_str, config)
        .await
        .map_err(|e| run.fail(e))
}

async fn process_with(
    doc: &RawDocument,
    config: &ExtractionConfig,
    run: &mut Run<'_>,
) -> Result<(Extracted, adapter::AdapterResponse, Instant), PipelineError> {
    let started = Instant::now();
    let extracted = run_extraction(doc, config, run).await?;

    run.enter(Stage::Structuring);
    let (provider, label) = resolve_provider(config).map_err(|e| run.fail(e.into()))?;
    let response = adapter::extract_record(&provider, &label, &extracted.artifact, config)
        .await
        .map_err(|e| run.fail(e.into()))?;

    Ok((extracted, response, started))
}

fn build_processed(
    doc: &RawDocument,
    run: Run<'_>,
    extracted: Extracted,
    response: adapter::AdapterResponse,
    started: Instant,
) -> ProcessedDocument {
    let outcome = run.finish(extracted);
    let provenance = Provenance {
        filename: doc.filename().map(str::to_string),
        detected_kind: outcome.verdict.kind,
        method: outcome.method(),
        page_count: outcome.total_pages,
    };
    let total_duration_ms = started.elapsed().as_millis() as u64;

    info!(
        "Processed {} via {} in {}ms ({} in / {} out tokens, {} attempt(s))",
        doc.filename().unwrap_or("<bytes>"),
        provenance.method,
        total_duration_ms,
        response.input_tokens,
        response.output_tokens,
        response.attempts
    );

    ProcessedDocument {
        record: response.record,
        provenance,
        outcome,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        total_duration_ms,
    }
}

async fn run_extraction(
    doc: &RawDocument,
    config: &ExtractionConfig,
    run: &mut Run<'_>,
) -> Result<Extracted, PipelineError> {
    // ── Validating ───────────────────────────────────────────────────────
    run.enter(Stage::Validating);
    input::validate(doc.bytes(), config.max_file_size)
        .into_result()
        .map_err(|e| run.fail(e))?;

    // ── Classifying ──────────────────────────────────────────────────────
    run.enter(Stage::Classifying);
    let verdict = classify_blocking(doc, config)
        .await
        .map_err(|e| run.fail(e))?;

    // ── Extracting ───────────────────────────────────────────────────────
    let text = if verdict.kind == DocumentKind::ImageDominant {
        info!("Image-dominant document; rendering pages directly");
        None
    } else {
        run.enter(Stage::ExtractingText);
        try_text(doc, config, &verdict)
            .await
            .map_err(|e| run.fail(e))?
    };

    let images = match &text {
        Some(_) if verdict.kind == DocumentKind::Hybrid && config.attach_images_for_hybrid => {
            run.enter(Stage::ExtractingImages);
            match render::render_document(doc.shared_bytes(), config).await {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!("Hybrid page rendering failed ({}); keeping text only", e);
                    None
                }
            }
        }
        Some(_) => None,
        None => {
            run.enter(Stage::ExtractingImages);
            let set = render::render_document(doc.shared_bytes(), config)
                .await
                .map_err(|source| run.fail(PipelineError::UnprocessableDocument { source }))?;
            Some(set)
        }
    };

    // ── Assembling ───────────────────────────────────────────────────────
    run.enter(Stage::Assembling);
    let extracted = assemble(verdict, text, images).map_err(|e| run.fail(e))?;
    info!(
        "Extraction complete: method={}, {} of {} pages{}",
        extracted.artifact.method(),
        extracted.pages_processed,
        extracted.total_pages,
        if extracted.truncated { " (truncated)" } else { "" }
    );
    Ok(extracted)
}

async fn classify_blocking(
    doc: &RawDocument,
    config: &ExtractionConfig,
) -> Result<ClassificationVerdict, PipelineError> {
    let bytes = doc.shared_bytes();
    let cfg = config.clone();
    let budget = config.classify_timeout;
    let cancel = CancelFlag::new();
    let _guard = cancel.cancel_on_drop();

    let worker = cancel.clone();
    let task = tokio::task::spawn_blocking(move || classify::classify(&bytes, &cfg, &worker));

    match tokio::time::timeout(budget, task).await {
        Ok(joined) => joined
            .map_err(|e| PipelineError::Internal(format!("Classify task panicked: {}", e)))?
            .map_err(PipelineError::from),
        Err(_) => {
            cancel.cancel();
            Err(ClassifyError::Timeout {
                budget_ms: budget.as_millis() as u64,
            }
            .into())
        }
    }
}

/// Text extraction with the per-verdict acceptance threshold. `Ok(None)`
/// means "fall back to rendering".
async fn try_text(
    doc: &RawDocument,
    config: &ExtractionConfig,
    verdict: &ClassificationVerdict,
) -> Result<Option<TextArtifact>, PipelineError> {
    let required = match verdict.kind {
        DocumentKind::Unknown => config.unknown_min_chars,
        _ => config.text_first_min_chars,
    };

    match text::extract_text(doc.shared_bytes(), config).await {
        Ok(t) => {
            let chars = t.content.chars().count();
            if chars >= required {
                info!("Using extracted text ({} characters)", chars);
                Ok(Some(t))
            } else {
                warn!(
                    "Only {} characters of text (need {}); falling back to page images",
                    chars, required
                );
                Ok(None)
            }
        }
        Err(e) if e.triggers_fallback() => {
            warn!("Text extraction unusable ({}); falling back to page images", e);
            Ok(None)
        }
        Err(source) => Err(PipelineError::UnprocessableDocument { source }),
    }
}

fn assemble(
    verdict: ClassificationVerdict,
    text: Option<TextArtifact>,
    images: Option<ImageSet>,
) -> Result<Extracted, PipelineError> {
    let total_pages = verdict.page_count;
    let (artifact, pages_processed, truncated) = match (text, images) {
        (Some(text), Some(images)) => {
            let truncated = images.is_truncated();
            let pages = text.page_count;
            (ExtractedArtifact::Mixed { text, images }, pages, truncated)
        }
        (Some(text), None) => {
            let pages = text.page_count;
            (ExtractedArtifact::Text(text), pages, false)
        }
        (None, Some(images)) => {
            let truncated = images.is_truncated();
            let pages = images.pages.len();
            (ExtractedArtifact::Images(images), pages, truncated)
        }
        (None, None) => {
            return Err(PipelineError::Internal(
                "no artifact was produced".to_string(),
            ))
        }
    };

    Ok(Extracted {
        verdict,
        artifact,
        pages_processed,
        total_pages,
        truncated,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AdapterError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AdapterError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the extraction provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    the default model; the API key comes from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Returns the provider and a label for logs and errors.
fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<(Arc<dyn LLMProvider>, String), AdapterError> {
    if let Some(ref provider) = config.provider {
        let label = config.provider_name.clone().unwrap_or_else(|| "custom".to_string());
        return Ok((Arc::clone(provider), label));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_provider(name, model)?, name.clone()));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_provider(&prov, &model)?, prov));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AdapterError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No extraction provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}
