//! CLI binary for pagemark.
//!
//! Maps flags onto `ConversionConfig`, runs one conversion and prints the
//! Markdown (or the JSON run result) to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagemark::{
    convert, ConversionConfig, ConversionOutput, ConversionProgressCallback, PageSeparator,
    ProgressCallback, ProviderOptions,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Renders a live bar plus one log line per page. Pages inside a batch can
/// finish in any order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Starts as a spinner; `on_conversion_start` sets the length once the
    /// page images exist.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Transcribing {total_pages} pages…"))
        ));
    }

    fn on_batch_start(&self, batch: usize, batches: usize, batch_size: usize) {
        self.bar.println(dim(&format!(
            "  batch {batch}/{batches} ({batch_size} pages)"
        )));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_pages.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} pages transcribed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages transcribed  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown to stdout
  pagemark document.pdf

  # Write out/document.md and keep the rendered pages for inspection
  pagemark document.pdf --output-dir out --no-cleanup --temp-dir /tmp/pages

  # Sequential mode: each page sees the previous page's Markdown
  pagemark --maintain-format book.pdf --output-dir out

  # Specific provider and model, low image detail
  pagemark --provider anthropic --model claude-sonnet-4-20250514 \
           --option image_detail=low paper.pdf

  # From a URL, JSON run result
  pagemark https://arxiv.org/pdf/1706.03762 --json > result.json

PROVIDER OPTIONS (--option key=value, repeatable):
  temperature        sampling temperature (number)
  max_tokens         max output tokens per page (integer)
  top_p              nucleus sampling (number)
  frequency_penalty  (number)
  presence_penalty   (number)
  stop               stop sequence, or a JSON list of them
  response_format    provider response format, e.g. json_object
  image_detail       low | high | auto

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY      OpenAI API key (used when no provider is named)
  PAGEMARK_PROVIDER   Provider name (openai, anthropic, gemini, ollama, …)
  PAGEMARK_MODEL      Model ID
  PDFIUM_LIB_PATH     Directory or file of an existing libpdfium
  RUST_LOG            Log filter, overrides -v / -q
"#;

/// Transcribe PDF files and URLs to Markdown with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pagemark",
    version,
    about = "Transcribe PDF files and URLs to Markdown with a vision LLM",
    long_about = "Render each page of a PDF (local file or URL) to an image and have a vision \
language model transcribe it to Markdown. Pages are processed in concurrent batches, or \
sequentially with the previous page as formatting context.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write <name>.md into this directory (Markdown still goes to stdout
    /// unless --quiet).
    #[arg(short, long, env = "PAGEMARK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Vision model ID (default: gpt-4o-mini for a named provider, the
    /// provider's own default when auto-detected).
    #[arg(long, env = "PAGEMARK_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure, …
    #[arg(long, env = "PAGEMARK_PROVIDER")]
    provider: Option<String>,

    /// Pages in flight per batch.
    #[arg(short, long, env = "PAGEMARK_CONCURRENCY", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Sequential mode: pass the previous page's Markdown as context.
    #[arg(long, env = "PAGEMARK_MAINTAIN_FORMAT")]
    maintain_format: bool,

    /// Parent directory for the per-run working directory.
    #[arg(long, env = "PAGEMARK_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Keep the working directory (downloaded PDF, page images).
    #[arg(long, env = "PAGEMARK_NO_CLEANUP")]
    no_cleanup: bool,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PAGEMARK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Provider option as key=value; the value is parsed as JSON, else
    /// taken as a string. Repeatable.
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    options: Vec<(String, serde_json::Value)>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PAGEMARK_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PAGEMARK_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PAGEMARK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "PAGEMARK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Page separator: blank, hr, comment, or a custom string.
    #[arg(long, env = "PAGEMARK_SEPARATOR", default_value = "blank")]
    separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGEMARK_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the run result as JSON instead of Markdown.
    #[arg(long, env = "PAGEMARK_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PAGEMARK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEMARK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, env = "PAGEMARK_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGEMARK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PAGEMARK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar replaces INFO logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    let output = convert(&cli.input, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet || cli.output_dir.is_none() {
        write_markdown(&output)?;
    }

    if !cli.quiet && !cli.json {
        print_summary(&output);
    }

    Ok(())
}

fn write_markdown(output: &ConversionOutput) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(output.markdown().as_bytes())
        .context("Failed to write to stdout")?;
    if !output.markdown().ends_with('\n') {
        handle.write_all(b"\n").context("Failed to write to stdout")?;
    }
    Ok(())
}

fn print_summary(output: &ConversionOutput) {
    let total = output.pages().len();
    let failed = output.failed_pages();
    eprintln!(
        "{}  {}/{} pages  {}ms",
        if failed == 0 { green("✔") } else { cyan("⚠") },
        total - failed,
        total,
        output.completion_time_ms(),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&output.input_tokens().to_string()),
        dim(&output.output_tokens().to_string()),
    );
    if let Some(path) = output.output_path() {
        eprintln!("   wrote {}", bold(&path.display().to_string()));
    }
    if let Some(dir) = output.work_dir() {
        eprintln!("   kept {}", dim(&dir.display().to_string()));
    }
    if let Some(err) = output.cleanup_error() {
        eprintln!("   {} cleanup failed: {}", cyan("⚠"), err);
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .concurrency(cli.concurrency as usize)
        .maintain_format(cli.maintain_format)
        .cleanup(!cli.no_cleanup)
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .page_separator(parse_separator(&cli.separator))
        .provider_options(cli.options.iter().cloned().collect::<ProviderOptions>())
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir.clone());
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--option key=value`.
fn parse_option(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
    Ok((key.to_string(), value))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => PageSeparator::BlankLine,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
