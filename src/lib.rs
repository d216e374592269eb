//! # pagemark
//!
//! Transcribe PDF documents to Markdown with a vision language model, one
//! page image at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (path or URL)
//!  │
//!  ├─ 1. Input    validate local file or download into the working directory
//!  ├─ 2. Render   rasterise pages to PNG via pdfium (spawn_blocking)
//!  ├─ 3. Process  batches of concurrent model calls, or a sequential chain
//!  │              where each page sees the previous page's Markdown
//!  ├─ 4. Join     successful pages in page order
//!  ├─ 5. Persist  <output_dir>/<file_name>.md (optional)
//!  └─ 6. Cleanup  remove the working directory (optional)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagemark::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from the environment (OPENAI_API_KEY, …)
//!     let config = ConversionConfig::builder()
//!         .concurrency(4)
//!         .output_dir("out")
//!         .build()?;
//!     let output = convert("document.pdf", &config).await?;
//!     println!("{}", output.markdown());
//!     eprintln!(
//!         "tokens: {} in / {} out",
//!         output.input_tokens(),
//!         output.output_tokens()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagemark` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! pagemark = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, PageSeparator, ProviderOptions, DEFAULT_MODEL,
};
pub use convert::{convert, convert_sync};
pub use error::{ModelError, PageError, PagemarkError};
pub use output::{ConversionOutput, PageResult, TokenTally};
pub use pipeline::model::{Completion, LlmVisionModel, VisionModel};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
