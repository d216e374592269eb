//! Prompts sent to the vision model.
//!
//! Callers can override the default via
//! [`crate::config::ConversionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// Default system prompt for transcribing one page image to Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are transcribing a single page of a PDF document into Markdown.

Rules:
- Transcribe ALL visible text faithfully, in the order a human would read it.
- Do NOT invent, summarise, or omit content. If something is illegible, leave it out rather than guess.
- Preserve structure: headings (#, ##, ###), ordered and unordered lists, emphasis.
- Render tables as GFM pipe tables; fall back to HTML table markup only when a pipe table cannot express the layout.
- Render mathematical notation as LaTeX ($inline$, $$display$$).
- Ignore page numbers, running headers and footers, and purely decorative lines.

Output ONLY the Markdown for this page. Do not wrap it in ```markdown fences and do not add commentary."#;

/// Build the format-continuity message for maintain-format mode.
///
/// Sent as a second system message carrying the previous page's Markdown.
pub fn maintain_format_context(prior_page: &str) -> String {
    format!(
        "Markdown must maintain consistent formatting with the following page:\n\n\"\"\"{}\"\"\"",
        prior_page
    )
}
