//! Run orchestration: input → page images → model → Markdown.
//!
//! ```text
//! RESOLVE_INPUT → RASTERIZE → PROCESS (chain | batches) → AGGREGATE
//!   → PERSIST (if output_dir) → CLEANUP (if cleanup) → ConversionOutput
//! ```
//!
//! The working directory is acquired after the input reference has been
//! validated and is released on every path out of [`convert`]: explicitly at
//! the end of a run, or by `Drop` when a fatal error returns early.

use crate::config::{ConversionConfig, PageSeparator};
use crate::error::PagemarkError;
use crate::output::{ConversionOutput, PageResult, TokenTally};
use crate::pipeline::batch::{run_batches, run_sequential};
use crate::pipeline::input::{self, InputRef};
use crate::pipeline::model::resolve_vision_model;
use crate::pipeline::page::RetryPolicy;
use crate::pipeline::render::{self, PdfiumRasterizer, Rasterizer};
use crate::pipeline::workdir::{Released, WorkDir};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF file or URL to Markdown.
///
/// # Returns
/// `Ok(ConversionOutput)` even if some pages failed; check
/// [`ConversionOutput::failed_pages`].
///
/// # Errors
/// Only fatal errors are returned:
/// - empty, missing, or undownloadable input (`FileUnavailable`)
/// - not a PDF, or a PDF pdfium cannot open
/// - no page images produced
/// - provider not configured or invalid provider options
/// - output file cannot be written
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, PagemarkError> {
    let start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    config.validate()?;
    let concurrency = NonZeroUsize::new(config.concurrency)
        .ok_or_else(|| PagemarkError::InvalidConfig("Concurrency must be ≥ 1".into()))?;

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let input_ref = InputRef::parse(input_str)?;
    let local = match &input_ref {
        InputRef::Local(path) => Some(input::resolve_local(path).await?),
        InputRef::Remote(_) => None,
    };

    let model = resolve_vision_model(config)?;

    let work_dir = WorkDir::create(config.temp_dir.as_deref(), config.cleanup).await?;

    let source = match local {
        Some(doc) => doc,
        None => {
            input::download(
                input_str.trim(),
                work_dir.path(),
                config.download_timeout_secs,
            )
            .await?
        }
    };
    debug!("Document name: {}", source.file_name);

    // ── Step 2: Rasterise ────────────────────────────────────────────────
    let rasterizer: Arc<dyn Rasterizer> = match config.rasterizer {
        Some(ref r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer::from_config(config)),
    };
    let render_start = Instant::now();
    rasterizer.rasterize(&source.path, work_dir.path()).await?;
    let images = render::collect_page_images(work_dir.path()).await?;
    info!(
        "Rasterised {} pages in {}ms",
        images.len(),
        render_start.elapsed().as_millis()
    );

    if images.is_empty() {
        return Err(PagemarkError::NoPagesRendered { path: source.path });
    }

    // ── Step 3: Process pages ────────────────────────────────────────────
    let progress = config.progress_callback.as_ref();
    if let Some(cb) = progress {
        cb.on_conversion_start(images.len());
    }

    let policy = RetryPolicy::from_config(config);
    let pages = if config.maintain_format {
        run_sequential(&images, model.as_ref(), &policy, progress).await
    } else {
        run_batches(&images, concurrency, model.as_ref(), &policy, progress).await
    };

    // ── Step 4: Aggregate ────────────────────────────────────────────────
    let succeeded = pages.iter().filter(|p| p.is_success()).count();
    if let Some(cb) = progress {
        cb.on_conversion_complete(pages.len(), succeeded);
    }

    if succeeded == 0 {
        warn!(
            "All {} pages failed; the document will be empty",
            pages.len()
        );
    }

    let tally: TokenTally = pages.iter().collect();
    let markdown = assemble_document(&pages, &config.page_separator);

    // ── Step 5: Persist ──────────────────────────────────────────────────
    let output_path = match config.output_dir {
        Some(ref dir) => Some(persist(dir, &source.file_name, &markdown).await?),
        None => None,
    };

    // ── Step 6: Cleanup ──────────────────────────────────────────────────
    let (kept_dir, cleanup_error) = match work_dir.finish().await {
        Released::Removed => (None, None),
        Released::Kept(path) => {
            info!("Kept working directory: {}", path.display());
            (Some(path), None)
        }
        Released::CleanupFailed(e) => (None, Some(e.to_string())),
    };

    let completion_time_ms = start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {}/{} pages, {} in / {} out tokens, {}ms",
        succeeded,
        pages.len(),
        tally.input,
        tally.output,
        completion_time_ms
    );

    Ok(
        ConversionOutput::new(completion_time_ms, source.file_name, tally, pages, markdown)
            .with_output_path(output_path)
            .with_work_dir(kept_dir)
            .with_cleanup_error(cleanup_error),
    )
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, PagemarkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PagemarkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Join successful pages in page order; failed pages contribute nothing.
fn assemble_document(pages: &[PageResult], separator: &PageSeparator) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().filter(|p| p.is_success()).enumerate() {
        if i > 0 {
            out.push_str(&separator.render(page.page()));
        }
        out.push_str(page.content());
    }
    out
}

/// Write `<dir>/<file_name>.md`, replacing any previous file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
async fn persist(dir: &Path, file_name: &str, markdown: &str) -> Result<PathBuf, PagemarkError> {
    let path = dir.join(format!("{}.md", file_name));
    let write_failed = |source| PagemarkError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(write_failed)?;

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown)
        .await
        .map_err(write_failed)?;

    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        if let Err(rm) = tokio::fs::remove_file(&tmp_path).await {
            warn!("Could not remove {}: {}", tmp_path.display(), rm);
        }
        return Err(write_failed(e));
    }

    info!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;

    fn pages() -> Vec<PageResult> {
        vec![
            PageResult::success(1, "# One".into(), 1, 1),
            PageResult::failure(2, PageError::Timeout { page: 2, secs: 1 }, 0, 0),
            PageResult::success(3, "Three".into(), 1, 1),
        ]
    }

    #[test]
    fn assemble_skips_failed_pages() {
        assert_eq!(
            assemble_document(&pages(), &PageSeparator::BlankLine),
            "# One\n\nThree"
        );
    }

    #[test]
    fn assemble_with_comment_separator() {
        assert_eq!(
            assemble_document(&pages(), &PageSeparator::Comment),
            "# One\n\n<!-- page 3 -->\n\nThree"
        );
    }

    #[tokio::test]
    async fn persist_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");

        let first = persist(&out, "report", "old").await.unwrap();
        let second = persist(&out, "report", "new").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "new");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }
}
