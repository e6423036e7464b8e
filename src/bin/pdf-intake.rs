//! CLI binary for pdf-intake.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_intake::{
    classify, extract_input, load_document, process_input, validate, CancelFlag,
    ExtractionConfig, ExtractionMethod, PipelineProgressCallback, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner showing the current orchestrator state, with one log line per
/// rendered page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        let label = match stage {
            Stage::Loading => "Loading",
            Stage::Validating => "Validating",
            Stage::Classifying => "Classifying",
            Stage::ExtractingText => "Reading text",
            Stage::ExtractingImages => "Rendering",
            Stage::Assembling => "Assembling",
            Stage::Structuring => "Structuring",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        };
        self.bar.set_prefix(label);
        if stage == Stage::Failed {
            self.bar.finish_and_clear();
        }
    }

    fn on_page_rendered(&self, page_num: usize, total: usize, bytes: usize) {
        self.bar.println(format!(
            "  {} Page {:>2}/{:<2}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:>7} bytes", bytes)),
        ));
    }

    fn on_page_failed(&self, page_num: usize, total: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>2}/{:<2}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
        ));
    }

    fn on_complete(&self, method: ExtractionMethod) {
        self.bar.finish_and_clear();
        eprintln!("{} extracted via {}", green("✔"), bold(&method.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline: print the structured record as JSON
  pdf-intake resume.pdf

  # Write the record to a file
  pdf-intake resume.pdf -o record.json

  # Only classify (no API key needed)
  pdf-intake --classify-only resume.pdf

  # Extract text or page images without calling the model
  pdf-intake --extract-only resume.pdf

  # Send both text and page images for hybrid documents
  pdf-intake --hybrid-images --provider anthropic --model claude-sonnet-4-20250514 resume.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory or file of the pdfium library (image path only)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Classify PDF resumes, extract their content, and structure it with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-intake",
    version,
    about = "Classify PDF resumes, extract text or page images, and structure them with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "PDF_INTAKE_OUTPUT")]
    output: Option<PathBuf>,

    /// Stop after classification and print the verdict.
    #[arg(long, conflicts_with = "extract_only")]
    classify_only: bool,

    /// Stop after extraction and print the artifact; no model call.
    #[arg(long)]
    extract_only: bool,

    /// Print the full result (verdict, states, timings, provenance) as JSON.
    #[arg(long, env = "PDF_INTAKE_JSON")]
    json: bool,

    /// Pages to render when falling back to images (1–10).
    #[arg(long, env = "PDF_INTAKE_MAX_PAGES", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..=10))]
    max_pages: u64,

    /// Largest accepted document in bytes.
    #[arg(long, env = "PDF_INTAKE_MAX_FILE_SIZE", default_value_t = 10 * 1024 * 1024)]
    max_file_size: usize,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Also attach page images when a hybrid document's text is usable.
    #[arg(long, env = "PDF_INTAKE_HYBRID_IMAGES")]
    hybrid_images: bool,

    /// Text extraction budget in seconds.
    #[arg(long, env = "PDF_INTAKE_TEXT_TIMEOUT", default_value_t = 30)]
    text_timeout: u64,

    /// Model call timeout in seconds.
    #[arg(long, env = "PDF_INTAKE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Retries for rate-limited or timed-out model calls.
    #[arg(long, env = "PDF_INTAKE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF_INTAKE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Directory or file of the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF_INTAKE_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "PDF_INTAKE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF_INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF_INTAKE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the feedback while it is active, so library INFO
    // logs are suppressed unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.classify_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Classify-only mode ───────────────────────────────────────────────
    if cli.classify_only {
        let doc = load_document(&cli.input, &config)
            .await
            .context("Failed to load document")?;
        validate(doc.bytes(), config.max_file_size)
            .into_result()
            .context("Document rejected")?;
        let verdict = classify(doc.bytes(), &config, &CancelFlag::new())
            .context("Failed to classify document")?;

        let text = if cli.json {
            serde_json::to_string_pretty(&verdict).context("Failed to serialise verdict")?
        } else {
            format!(
                "Kind:         {}\nConfidence:   {:.2}\nPages:        {}\nText density: {:.1} chars/page\nImages:       {}",
                verdict.kind,
                verdict.confidence,
                verdict.page_count,
                verdict.text_density,
                if verdict.has_image_operators { "yes" } else { "no" },
            )
        };
        return emit(&cli, &text);
    }

    // ── Extract-only mode ────────────────────────────────────────────────
    if cli.extract_only {
        let outcome = extract_input(&cli.input, &config)
            .await
            .context("Extraction failed")?;

        let text = if cli.json {
            serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
        } else {
            outcome.artifact.text().unwrap_or_default().to_string()
        };
        emit(&cli, &text)?;

        if !cli.quiet {
            eprintln!(
                "{} {} → {}  {}/{} pages{}",
                dim("◆"),
                outcome.verdict.kind,
                bold(&outcome.method().to_string()),
                outcome.pages_processed,
                outcome.total_pages,
                if outcome.truncated { " (truncated)" } else { "" },
            );
            for page in outcome.artifact.images() {
                eprintln!(
                    "   page {:>2}: {}x{} {}",
                    page.page_num,
                    page.width,
                    page.height,
                    dim(&format!("{} bytes", page.byte_len())),
                );
            }
        }
        return Ok(());
    }

    // ── Full pipeline ────────────────────────────────────────────────────
    let result = process_input(&cli.input, &config)
        .await
        .context("Processing failed")?;

    let text = if cli.json {
        serde_json::to_string_pretty(&result).context("Failed to serialise result")?
    } else {
        serde_json::to_string_pretty(&result.record).context("Failed to serialise record")?
    };
    emit(&cli, &text)?;

    if !cli.quiet {
        eprintln!(
            "   {} via {}  {} tokens in / {} tokens out  {}ms",
            result.provenance.detected_kind,
            result.provenance.method,
            dim(&result.input_tokens.to_string()),
            dim(&result.output_tokens.to_string()),
            result.total_duration_ms,
        );
    }

    Ok(())
}

/// Write `text` to `--output` or stdout, with a trailing newline.
fn emit(cli: &Cli, text: &str) -> Result<()> {
    if let Some(ref path) = cli.output {
        std::fs::write(path, format!("{text}\n"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .max_pages(cli.max_pages as usize)
        .max_file_size(cli.max_file_size)
        .attach_images_for_hybrid(cli.hybrid_images)
        .text_timeout_secs(cli.text_timeout)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
