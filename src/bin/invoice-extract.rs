//! CLI binary for invoice-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use invoice_extract::pipeline::input::discover_documents;
use invoice_extract::{
    export, extract_directory, extract_document, BatchOutput, ContentKind, ExtractionConfig,
    ExtractionProgressCallback, ProgressCallback, RetryPolicy,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Documents finish out of order, so timings are keyed by document index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting line items from {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str, rows: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{rows:>4} rows")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep long provider errors on one line.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, succeeded: usize) {
        let failed = total_documents.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents extracted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every invoice in a folder into ./output
  invoice-extract invoices/

  # Choose the output folder and a 30% markup
  invoice-extract invoices/ -o sheets/ --markup 0.30

  # A single file
  invoice-extract invoices/inv-0042.pdf

  # Use Claude instead of the auto-detected provider
  invoice-extract --provider anthropic invoices/

  # Treat "Delivery" as a non-product line as well
  invoice-extract --placeholders "N/A,-,TBD,Delivery" invoices/

  # US-style invoices: try month-first dates before day-first
  invoice-extract --date-format "%m/%d/%Y" --date-format "%Y-%m-%d" invoices/

  # JSON to stdout instead of CSV files
  invoice-extract --json invoices/ > batch.json

OUTPUT:
  <OUTPUT>/<stem>.csv                          one table per document
  <OUTPUT>/combined_invoices_<timestamp>.csv   all rows, sorted by date, product

  Columns: Date, Product, Quantity, U.Price, Marked_Up_Price, Total_Price,
           Source_Document

SUPPORTED INPUTS:
  .pdf (every page is rasterised and sent in one request)
  .jpg .jpeg .png .webp .gif

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
  RUST_LOG                Override the log filter (e.g. invoice_extract=debug)
"#;

/// Extract invoice line items into CSV tables using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-extract",
    version,
    about = "Extract invoice line items into CSV tables using Vision LLMs",
    long_about = "Send each PDF or image invoice in a folder to a Vision Language Model, \
normalise and validate the line items it returns, apply a markup to unit prices, and write \
one CSV per invoice plus a combined CSV sorted by date and product. Supports OpenAI, \
Anthropic, Google Gemini, Azure OpenAI and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder of invoices, or a single PDF / image file.
    input: PathBuf,

    /// Folder for the CSV tables (created if missing).
    #[arg(short, long, env = "INVOICE_EXTRACT_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Vision model ID (e.g. gpt-4.1-mini, claude-3-7-sonnet-20250219, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Number of documents processed at once.
    #[arg(short, long, env = "INVOICE_EXTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Markup applied to unit prices (0.25 = +25%).
    #[arg(long, env = "INVOICE_EXTRACT_MARKUP", default_value = "0.25", value_parser = parse_rate)]
    markup: Decimal,

    /// Model attempts per document, including the first.
    #[arg(long, env = "INVOICE_EXTRACT_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Delay before the first retry, in milliseconds (doubles each retry).
    #[arg(long, env = "INVOICE_EXTRACT_RETRY_BASE_MS", default_value_t = 1000)]
    retry_base_ms: u64,

    /// Product names that mark a row as noise (comma-separated; replaces the defaults).
    #[arg(long, env = "INVOICE_EXTRACT_PLACEHOLDERS", value_delimiter = ',')]
    placeholders: Option<Vec<String>>,

    /// Accepted date pattern (chrono strftime); repeat to try several in order.
    #[arg(long = "date-format", env = "INVOICE_EXTRACT_DATE_FORMAT")]
    date_formats: Vec<String>,

    /// Ignore rows beyond this many per document.
    #[arg(long, env = "INVOICE_EXTRACT_MAX_ROWS")]
    max_rows: Option<usize>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "INVOICE_EXTRACT_PROMPT")]
    prompt: Option<PathBuf>,

    /// Max LLM output tokens per document.
    #[arg(long, env = "INVOICE_EXTRACT_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INVOICE_EXTRACT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Longest edge, in pixels, of each rendered PDF page.
    #[arg(long, env = "INVOICE_EXTRACT_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Per-document LLM call timeout in seconds.
    #[arg(long, env = "INVOICE_EXTRACT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the batch (tables, per-document results, stats) as JSON instead of writing CSV.
    #[arg(long, env = "INVOICE_EXTRACT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE_EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE_EXTRACT_QUIET")]
    quiet: bool,
}

fn parse_rate(s: &str) -> std::result::Result<Decimal, String> {
    let rate = Decimal::from_str(s.trim()).map_err(|e| format!("not a decimal: {e}"))?;
    if rate.is_sign_negative() {
        return Err("markup must not be negative".into());
    }
    Ok(rate)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Ensure PDFium engine is available ───────────────────────────────────
    // Only PDFs need it. On the very first run the library (~30 MB) is
    // downloaded and cached; later runs only check the path.
    if needs_pdfium(&cli.input) && !pdfium_auto::is_pdfium_cached() {
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.set_message("Connecting…");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = if cli.input.is_file() {
        extract_document(&cli.input, &config).await
    } else {
        extract_directory(&cli.input, &config).await
    }
    .context("Extraction failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    let summary = export::write_batch(&output, &cli.output, chrono::Local::now())
        .context("Failed to write CSV tables")?;

    if !cli.quiet {
        print_summary(&output, &summary.combined_file, show_progress);
    }

    Ok(())
}

/// True if the input is, or contains, a PDF.
fn needs_pdfium(input: &Path) -> bool {
    if input.is_file() {
        return ContentKind::from_path(input) == Some(ContentKind::Document);
    }
    discover_documents(input)
        .map(|found| {
            found
                .documents
                .iter()
                .any(|d| d.kind == ContentKind::Document)
        })
        .unwrap_or(false)
}

fn print_summary(output: &BatchOutput, combined: &Path, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        eprintln!(
            "Extracted {}/{} documents in {}ms",
            stats.succeeded, stats.total_documents, stats.total_duration_ms
        );
        for err in output.failures() {
            eprintln!("  {} {}", red("✗"), err);
        }
    }
    eprintln!(
        "{}  {} rows  ({} dropped)  →  {}",
        if stats.failed == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.rows_extracted,
        stats.rows_dropped,
        bold(&combined.display().to_string()),
    );
    if stats.total_mismatches > 0 || stats.total_retries > 0 {
        eprintln!(
            "   {} rows where unit × quantity ≠ total  /  {} model retries",
            dim(&stats.total_mismatches.to_string()),
            dim(&stats.total_retries.to_string()),
        );
    }
    if stats.skipped_files > 0 {
        eprintln!(
            "   {} unsupported files skipped",
            dim(&stats.skipped_files.to_string())
        );
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .concurrency(cli.concurrency)
        .markup_rate(cli.markup)
        .retry(RetryPolicy {
            max_attempts: cli.max_attempts,
            base_delay_ms: cli.retry_base_ms,
            ..RetryPolicy::default()
        })
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_rendered_pixels(cli.max_pixels)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref placeholders) = cli.placeholders {
        builder = builder.placeholders(placeholders.iter().map(|p| p.trim().to_string()));
    }
    if !cli.date_formats.is_empty() {
        builder = builder.date_formats(cli.date_formats.iter().cloned());
    }
    if let Some(n) = cli.max_rows {
        builder = builder.max_rows(n);
    }
    if let Some(ref path) = cli.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
