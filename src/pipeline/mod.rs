//! Pipeline stages for PDF-to-Markdown transcription.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ batch ──▶ page ──▶ model
//! (path/URL) (pdfium)  (fan-out) (retry)  (VLM)
//! ```
//!
//! 1. [`input`]  : classify the reference, validate or download the PDF
//! 2. [`workdir`]: scoped temporary directory for the run
//! 3. [`render`] : rasterise pages to PNG files; `spawn_blocking` for pdfium
//! 4. [`batch`]  : sequential batches of concurrent pages, or the
//!    maintain-format chain
//! 5. [`page`]   : one page: encode, call the model with retry, clean up
//! 6. [`encode`] : PNG file → base64 image attachment
//! 7. [`model`]  : the vision-model capability and its LLM-backed adapter
//! 8. [`postprocess`]: deterministic cleanup of model output

pub mod batch;
pub mod encode;
pub mod input;
pub mod model;
pub mod page;
pub mod postprocess;
pub mod render;
pub mod workdir;
