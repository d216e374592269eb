//! Configuration types for a conversion run.
//!
//! All run behaviour is controlled through [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`]. Every knob lives in one struct so a config can
//! be cloned across tasks and logged as a whole.

use crate::error::PagemarkError;
use crate::pipeline::model::VisionModel;
use crate::pipeline::render::Rasterizer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Provider-specific options forwarded opaquely to the model adapter.
///
/// The pipeline never inspects these; the adapter validates them when it is
/// constructed and rejects keys it does not understand.
pub type ProviderOptions = BTreeMap<String, serde_json::Value>;

/// Configuration for a PDF-to-Markdown run.
///
/// # Example
/// ```rust
/// use pagemark::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .concurrency(4)
///     .maintain_format(true)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Model identifier resolved through the provider registry.
    ///
    /// `None` lets the provider registry choose: `PAGEMARK_MODEL`, the
    /// auto-detected provider's own default, or [`DEFAULT_MODEL`] for a
    /// named provider.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision model. Takes precedence over every provider setting.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Rasteriser used to turn the PDF into page images. Default: pdfium.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Sequential mode: each page's prompt carries the previous page's Markdown. Default: false.
    ///
    /// Pages are processed strictly one after another, so `concurrency` is
    /// ignored. Use it for books and reports where numbering and heading
    /// levels run across page boundaries.
    pub maintain_format: bool,

    /// Pages per batch in concurrent mode. Must be ≥ 1. Default: 10.
    ///
    /// At most this many model calls are in flight at once. Lower it if the
    /// provider answers with `429`.
    pub concurrency: usize,

    /// Directory receiving `<file_name>.md`. If None, nothing is written.
    pub output_dir: Option<PathBuf>,

    /// Root under which the working directory is created. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Remove the working directory when the run ends. Default: true.
    pub cleanup: bool,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Extra provider options (`temperature`, `max_tokens`, `image_detail`).
    /// Entries here override the typed fields below.
    pub provider_options: ProviderOptions,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium library path (file or directory). Falls back to
    /// `PDFIUM_LIB_PATH`, then the working directory, then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Separator between pages in the aggregated Markdown. Default: blank line.
    pub page_separator: PageSeparator,

    /// Receives per-batch and per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            vision_model: None,
            rasterizer: None,
            maintain_format: false,
            concurrency: 10,
            output_dir: None,
            temp_dir: None,
            cleanup: true,
            system_prompt: None,
            provider_options: ProviderOptions::new(),
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            pdfium_lib_path: None,
            page_separator: PageSeparator::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision_model", &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field("maintain_format", &self.maintain_format)
            .field("concurrency", &self.concurrency)
            .field("output_dir", &self.output_dir)
            .field("temp_dir", &self.temp_dir)
            .field("cleanup", &self.cleanup)
            .field("custom_system_prompt", &self.system_prompt.is_some())
            .field("provider_options", &self.provider_options)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("dpi", &self.dpi)
            .field("page_separator", &self.page_separator)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the constraints the builder enforces. The orchestrator calls this
    /// too, since every field is public.
    pub fn validate(&self) -> Result<(), PagemarkError> {
        if self.concurrency == 0 {
            return Err(PagemarkError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.dpi < 72 || self.dpi > 400 {
            return Err(PagemarkError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.api_timeout_secs == 0 {
            return Err(PagemarkError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(PagemarkError::InvalidConfig("Model must not be empty".into()));
        }
        Ok(())
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
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

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn maintain_format(mut self, v: bool) -> Self {
        self.config.maintain_format = v;
        self
    }

    /// Zero is rejected by [`ConversionConfigBuilder::build`].
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn cleanup(mut self, v: bool) -> Self {
        self.config.cleanup = v;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Add one passthrough provider option.
    pub fn provider_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.provider_options.insert(key.into(), value);
        self
    }

    pub fn provider_options(mut self, options: ProviderOptions) -> Self {
        self.config.provider_options = options;
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

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, PagemarkError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How to separate pages in the aggregated Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// A single blank line: "\n\n". (default)
    #[default]
    BlankLine,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment naming the page that follows: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::BlankLine => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
