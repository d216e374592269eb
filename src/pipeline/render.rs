//! PDF rasterisation: one PNG file per page inside the working directory.
//!
//! Rendering is behind the [`Rasterizer`] trait; [`PdfiumRasterizer`] is the
//! default. pdfium is not async-safe, so the work runs in `spawn_blocking`.
//!
//! Files are named `page-NNNN.png`. [`collect_page_images`] enumerates only
//! files matching that pattern, so the downloaded source PDF or any other
//! file in the directory is ignored.

use crate::config::ConversionConfig;
use crate::error::PagemarkError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name for the rendered image of a 1-based page.
pub fn page_file_name(page_num: usize) -> String {
    format!("page-{:04}.png", page_num)
}

static RE_PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page-(\d+)\.png$").unwrap());

/// One rasterised page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based position in page order.
    pub page: usize,
    pub path: PathBuf,
}

/// Renders every page of a PDF into `out_dir`.
///
/// Implementations write files named with [`page_file_name`]. A document that
/// cannot be opened at all is an error; individual pages that fail to render
/// are skipped.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> Result<(), PagemarkError>;
}

/// Rasteriser backed by pdfium-render.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            lib_path: config.pdfium_lib_path.clone(),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> Result<(), PagemarkError> {
        let this = self.clone();
        let pdf = pdf_path.to_path_buf();
        let out = out_dir.to_path_buf();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&pdf, &out))
            .await
            .map_err(|e| PagemarkError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn rasterize_blocking(&self, pdf_path: &Path, out_dir: &Path) -> Result<(), PagemarkError> {
        let pdfium = bind_pdfium(self.lib_path.as_deref())?;
        let password = self.password.as_deref();

        let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    PagemarkError::WrongPassword {
                        path: pdf_path.to_path_buf(),
                    }
                } else {
                    PagemarkError::PasswordRequired {
                        path: pdf_path.to_path_buf(),
                    }
                }
            } else {
                PagemarkError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: err_str,
                }
            }
        })?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let pages = document.pages();
        let total = pages.len() as usize;
        info!("PDF loaded: {} pages", total);

        let mut rendered = 0usize;
        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let image = match page.render_with_config(&render_config) {
                Ok(bitmap) => bitmap.as_image(),
                Err(e) => {
                    warn!("Skipping page {}: render failed: {:?}", page_num, e);
                    continue;
                }
            };

            let path = out_dir.join(page_file_name(page_num));
            if let Err(e) = image.save_with_format(&path, image::ImageFormat::Png) {
                warn!("Skipping page {}: could not write image: {}", page_num, e);
                continue;
            }
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            rendered += 1;
        }

        info!("Rendered {}/{} pages", rendered, total);
        Ok(())
    }
}

/// Bind to pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library.
fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, PagemarkError> {
    let configured = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match configured {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| PagemarkError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// List the page images in `dir`, ordered by page number and numbered 1..N.
///
/// Gaps left by pages that failed to render are closed up.
pub async fn collect_page_images(dir: &Path) -> Result<Vec<PageImage>, PagemarkError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PagemarkError::Internal(format!("Failed to list {}: {}", dir.display(), e)))?;

    let mut found: Vec<(usize, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PagemarkError::Internal(format!("Failed to list {}: {}", dir.display(), e)))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = RE_PAGE_FILE.captures(name) else {
            continue;
        };
        if let Ok(n) = caps[1].parse::<usize>() {
            found.push((n, entry.path()));
        }
    }

    found.sort_by_key(|(n, _)| *n);
    Ok(found
        .into_iter()
        .enumerate()
        .map(|(i, (_, path))| PageImage { page: i + 1, path })
        .collect())
}
