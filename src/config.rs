//! Configuration for the extraction pipeline.
//!
//! Every limit the pipeline enforces (file size, page cap, render scale,
//! JPEG quality, timeouts, classifier thresholds) lives in
//! [`ExtractionConfig`]. The config is built once, handed to the
//! orchestrator, and only ever read afterwards: no component keeps its own
//! copy of a limit or mutates process-wide state.

use crate::error::PipelineError;
use crate::pipeline::render::PageRenderer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on rendered pages per document.
///
/// `max_pages` can be lowered by the caller but never raised above this.
pub const PAGE_CAP: usize = 10;

/// Default upload ceiling: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Text-density thresholds (characters per page) used by the classifier.
///
/// These are heuristics, not derived constants. Tune them against a
/// representative corpus before changing the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    /// Above this density with no image operators: `TextDominant`. Default: 100.
    pub text_dominant: f64,
    /// At or below this density with image operators: `ImageDominant`. Default: 10.
    pub image_dominant_max: f64,
    /// Above this density with image operators: `Hybrid` candidate. Default: 50.
    pub hybrid_min: f64,
    /// Above this density, text wins over incidental images (logos,
    /// photos). Default: 200.
    pub dense_text_override: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            text_dominant: 100.0,
            image_dominant_max: 10.0,
            hybrid_min: 50.0,
            dense_text_override: 200.0,
        }
    }
}

/// Configuration for one pipeline invocation.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_intake::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_pages(5)
///     .text_timeout_secs(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Largest accepted document in bytes. Default: 10 MiB.
    pub max_file_size: usize,

    /// Pages to render when falling back to images. Range: 1–[`PAGE_CAP`]. Default: 10.
    ///
    /// Bounds latency and the number of images sent to the model. Longer
    /// documents are truncated silently; the outcome reports the true total.
    pub max_pages: usize,

    /// Raster scale relative to the page's point size. Default: 2.0.
    pub render_scale: f32,

    /// JPEG quality for compressed page images (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Maximum width of a compressed page image in pixels. Default: 1600.
    ///
    /// Wider renders are downscaled with the aspect ratio preserved. Narrower
    /// renders are never upscaled.
    pub max_image_width: u32,

    /// Wall-clock budget for text extraction. Default: 30s.
    ///
    /// On expiry the orchestrator falls back to rendering and the blocking
    /// extraction stops at its next page.
    pub text_timeout: Duration,

    /// Wall-clock budget for classification. Default: 30s.
    pub classify_timeout: Duration,

    /// Below this many normalised characters the text extractor reports
    /// `InsufficientText`. Default: 50.
    pub min_text_chars: usize,

    /// Text needed to accept a `TextDominant`/`Hybrid` document without
    /// rendering. Default: 100.
    pub text_first_min_chars: usize,

    /// Text needed to accept an `Unknown` document without rendering. Default: 50.
    pub unknown_min_chars: usize,

    /// Maximum pages the classifier samples. Default: 200.
    ///
    /// Density is measured over the sampled pages, so a pathological
    /// thousand-page upload cannot stall classification.
    pub classify_sample_pages: usize,

    /// Classifier density thresholds.
    pub thresholds: ClassifierThresholds,

    /// Also render pages for `Hybrid` documents whose text extraction
    /// succeeded, producing a mixed artifact. Default: false.
    pub attach_images_for_hybrid: bool,

    /// Directory or file path of the pdfium library. Falls back to
    /// `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Pre-constructed page renderer. Takes precedence over the pdfium default.
    pub renderer: Option<Arc<dyn PageRenderer>>,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate for the record. Default: 4096.
    pub max_tokens: usize,

    /// Retries for rate-limited or timed-out model calls. Default: 2.
    pub max_retries: u32,

    /// Initial backoff in milliseconds; doubles per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call model timeout. Default: 60s.
    pub api_timeout: Duration,

    /// Custom system prompt. If None, uses the built-in prompt with the schema.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Optional callback receiving stage and page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_pages: PAGE_CAP,
            render_scale: 2.0,
            jpeg_quality: 85,
            max_image_width: 1600,
            text_timeout: Duration::from_secs(30),
            classify_timeout: Duration::from_secs(30),
            min_text_chars: 50,
            text_first_min_chars: 100,
            unknown_min_chars: 50,
            classify_sample_pages: 200,
            thresholds: ClassifierThresholds::default(),
            attach_images_for_hybrid: false,
            pdfium_library_path: None,
            renderer: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout: Duration::from_secs(60),
            system_prompt: None,
            download_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_file_size", &self.max_file_size)
            .field("max_pages", &self.max_pages)
            .field("render_scale", &self.render_scale)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("max_image_width", &self.max_image_width)
            .field("text_timeout", &self.text_timeout)
            .field("classify_timeout", &self.classify_timeout)
            .field("min_text_chars", &self.min_text_chars)
            .field("text_first_min_chars", &self.text_first_min_chars)
            .field("unknown_min_chars", &self.unknown_min_chars)
            .field("classify_sample_pages", &self.classify_sample_pages)
            .field("thresholds", &self.thresholds)
            .field("attach_images_for_hybrid", &self.attach_images_for_hybrid)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn PageRenderer>"))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout", &self.api_timeout)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.clamp(1, PAGE_CAP);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn max_image_width(mut self, px: u32) -> Self {
        self.config.max_image_width = px.max(100);
        self
    }

    pub fn text_timeout(mut self, budget: Duration) -> Self {
        self.config.text_timeout = budget;
        self
    }

    pub fn text_timeout_secs(self, secs: u64) -> Self {
        self.text_timeout(Duration::from_secs(secs))
    }

    pub fn classify_timeout(mut self, budget: Duration) -> Self {
        self.config.classify_timeout = budget;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn text_first_min_chars(mut self, n: usize) -> Self {
        self.config.text_first_min_chars = n;
        self
    }

    pub fn unknown_min_chars(mut self, n: usize) -> Self {
        self.config.unknown_min_chars = n;
        self
    }

    pub fn classify_sample_pages(mut self, n: usize) -> Self {
        self.config.classify_sample_pages = n.max(1);
        self
    }

    pub fn thresholds(mut self, t: ClassifierThresholds) -> Self {
        self.config.thresholds = t;
        self
    }

    pub fn attach_images_for_hybrid(mut self, v: bool) -> Self {
        self.config.attach_images_for_hybrid = v;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout(mut self, budget: Duration) -> Self {
        self.config.api_timeout = budget;
        self
    }

    pub fn api_timeout_secs(self, secs: u64) -> Self {
        self.api_timeout(Duration::from_secs(secs))
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PipelineError> {
        let c = &self.config;
        if c.max_file_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_file_size must be > 0".into(),
            ));
        }
        if c.text_timeout.is_zero() || c.classify_timeout.is_zero() || c.api_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "text_timeout, classify_timeout and api_timeout must be > 0".into(),
            ));
        }
        let t = &c.thresholds;
        if !(t.image_dominant_max < t.hybrid_min && t.hybrid_min <= t.dense_text_override) {
            return Err(PipelineError::InvalidConfig(format!(
                "classifier thresholds must satisfy image_dominant_max < hybrid_min <= dense_text_override, got {} / {} / {}",
                t.image_dominant_max, t.hybrid_min, t.dense_text_override
            )));
        }
        if c.min_text_chars > c.text_first_min_chars {
            return Err(PipelineError::InvalidConfig(format!(
                "min_text_chars ({}) must not exceed text_first_min_chars ({})",
                c.min_text_chars, c.text_first_min_chars
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_file_size, 10 * 1024 * 1024);
        assert_eq!(c.max_pages, 10);
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.max_image_width, 1600);
        assert_eq!(c.text_timeout, Duration::from_secs(30));
        assert_eq!(c.classify_timeout, Duration::from_secs(30));
        assert!((c.render_scale - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn max_pages_is_clamped_to_cap() {
        let c = ExtractionConfig::builder().max_pages(40).build().unwrap();
        assert_eq!(c.max_pages, PAGE_CAP);
        let c = ExtractionConfig::builder().max_pages(0).build().unwrap();
        assert_eq!(c.max_pages, 1);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = ExtractionConfig::builder()
            .thresholds(ClassifierThresholds {
                text_dominant: 100.0,
                image_dominant_max: 60.0,
                hybrid_min: 50.0,
                dense_text_override: 200.0,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(ExtractionConfig::builder()
            .text_timeout_secs(0)
            .build()
            .is_err());
        assert!(ExtractionConfig::builder()
            .classify_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn sub_second_budgets_are_kept() {
        let c = ExtractionConfig::builder()
            .text_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(c.text_timeout, Duration::from_millis(250));
    }
}
