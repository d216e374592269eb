//! Error types for the pagemark library.
//!
//! Three error types map onto three distinct failure scopes:
//!
//! * [`PagemarkError`] is **fatal**: the run cannot proceed (no input file,
//!   unreadable PDF, provider not configured, output cannot be written).
//!   Returned as `Err(PagemarkError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] is **non-fatal**: one page failed after all retries but
//!   its siblings are fine. Stored inside [`crate::output::PageResult`] so
//!   callers can inspect partial success.
//!
//! * [`ModelError`] is the outcome of a single
//!   [`crate::pipeline::model::VisionModel::complete`] call. The page
//!   processor retries these and folds the last one into a [`PageError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pagemark library.
#[derive(Debug, Error)]
pub enum PagemarkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input reference is empty, missing, unreadable, or failed to download.
    #[error("File unavailable: '{input}': {reason}")]
    FileUnavailable { input: String, reason: String },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document at all.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Rasterisation finished without producing a single page image.
    #[error("No page images were produced from '{path}'")]
    NoPagesRendered { path: PathBuf },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A passthrough provider option was not understood by the provider.
    #[error("Invalid provider option '{key}': {reason}")]
    InvalidProviderOption { key: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the temporary working directory.
    #[error("Failed to create working directory under '{root}': {source}")]
    WorkDirFailed {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PagemarkError {
    /// Shorthand for [`PagemarkError::FileUnavailable`].
    pub fn file_unavailable(input: impl Into<String>, reason: impl Into<String>) -> Self {
        PagemarkError::FileUnavailable {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be read or encoded.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The model call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// Every attempt timed out.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Failure of one vision-model completion call.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The provider returned an error.
    #[error("{0}")]
    Provider(String),

    /// The call did not finish within the per-call timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}
