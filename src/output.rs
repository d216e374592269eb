//! Result types returned by a conversion run.
//!
//! [`PageResult`] and [`ConversionOutput`] are built once by the orchestrator
//! and exposed through read-only accessors, so a returned value can never
//! disagree with itself (e.g. `content_length` drifting from `content`).

use crate::error::PageError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Transcription of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult {
    page: usize,
    content: String,
    content_length: usize,
    input_tokens: usize,
    output_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<PageError>,
}

impl PageResult {
    /// A successfully transcribed page.
    pub fn success(
        page: usize,
        content: String,
        input_tokens: usize,
        output_tokens: usize,
    ) -> Self {
        Self {
            page,
            content_length: content.chars().count(),
            content,
            input_tokens,
            output_tokens,
            error: None,
        }
    }

    /// A page that produced no content. Tokens already spent are still counted.
    pub fn failure(page: usize, error: PageError, input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            page,
            content: String::new(),
            content_length: 0,
            input_tokens,
            output_tokens,
            error: Some(error),
        }
    }

    /// 1-based page number in aggregation order.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length of [`PageResult::content`] in characters (Unicode scalar values).
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn input_tokens(&self) -> usize {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> usize {
        self.output_tokens
    }

    pub fn error(&self) -> Option<&PageError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Running input/output token totals. Only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTally {
    pub input: u64,
    pub output: u64,
}

impl TokenTally {
    pub fn add(&mut self, input: usize, output: usize) {
        self.input += input as u64;
        self.output += output as u64;
    }
}

impl<'a> FromIterator<&'a PageResult> for TokenTally {
    fn from_iter<I: IntoIterator<Item = &'a PageResult>>(iter: I) -> Self {
        let mut tally = TokenTally::default();
        for page in iter {
            tally.add(page.input_tokens, page.output_tokens);
        }
        tally
    }
}

/// Outcome of a full conversion run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    completion_time_ms: u64,
    file_name: String,
    input_tokens: u64,
    output_tokens: u64,
    pages: Vec<PageResult>,
    markdown: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleanup_error: Option<String>,
}

impl ConversionOutput {
    pub(crate) fn new(
        completion_time_ms: u64,
        file_name: String,
        tally: TokenTally,
        pages: Vec<PageResult>,
        markdown: String,
    ) -> Self {
        Self {
            completion_time_ms,
            file_name,
            input_tokens: tally.input,
            output_tokens: tally.output,
            pages,
            markdown,
            output_path: None,
            work_dir: None,
            cleanup_error: None,
        }
    }

    pub(crate) fn with_output_path(mut self, path: Option<PathBuf>) -> Self {
        self.output_path = path;
        self
    }

    pub(crate) fn with_work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.work_dir = dir;
        self
    }

    pub(crate) fn with_cleanup_error(mut self, err: Option<String>) -> Self {
        self.cleanup_error = err;
        self
    }

    /// Wall-clock time of the whole run in milliseconds.
    pub fn completion_time_ms(&self) -> u64 {
        self.completion_time_ms
    }

    /// Sanitised document name, also used as the output file stem.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    /// One entry per page image, in page order.
    pub fn pages(&self) -> &[PageResult] {
        &self.pages
    }

    /// All successful pages joined with the configured separator.
    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    /// Where the Markdown was written, when an output directory was configured.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// The kept working directory, when cleanup was disabled.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Set when removing the working directory failed; the run itself succeeded.
    pub fn cleanup_error(&self) -> Option<&str> {
        self.cleanup_error.as_deref()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| !p.is_success()).count()
    }
}
