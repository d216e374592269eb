//! Input resolution: turn the user-supplied reference into a local PDF path.
//!
//! Local paths are used in place. URLs are downloaded into the run's working
//! directory so the copy disappears together with the page images. Both paths
//! check the `%PDF` magic bytes so a wrong file fails here with a clear error
//! instead of deep inside pdfium.

use crate::error::PagemarkError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Placeholder substituted for every non-alphanumeric character of a name.
pub const NAME_PLACEHOLDER: char = '_';

/// What the caller pointed at, before anything is touched on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    Local(PathBuf),
    Remote(String),
}

impl InputRef {
    /// Classify the input. An empty reference is a fatal `FileUnavailable`.
    pub fn parse(input: &str) -> Result<Self, PagemarkError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PagemarkError::file_unavailable(input, "no file path or URL given"));
        }
        if is_url(input) {
            Ok(InputRef::Remote(input.to_string()))
        } else {
            Ok(InputRef::Local(PathBuf::from(input)))
        }
    }
}

/// A PDF available on the local filesystem, with its sanitised name.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub file_name: String,
}

impl SourceDocument {
    fn new(path: PathBuf) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name: sanitize_file_name(&stem),
            path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Lowercase alphanumerics are kept; every other character becomes `_`.
///
/// `"Report (Final)!"` → `"report__final__"`.
pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .flat_map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                vec![NAME_PLACEHOLDER]
            }
        })
        .collect()
}

/// Validate a local PDF: it must exist, be readable, and start with `%PDF`.
pub async fn resolve_local(path: &Path) -> Result<SourceDocument, PagemarkError> {
    let display = path.display().to_string();

    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PagemarkError::file_unavailable(display, "permission denied"));
        }
        Err(e) => return Err(PagemarkError::file_unavailable(display, e.to_string())),
    };

    let metadata = file
        .metadata()
        .await
        .map_err(|e| PagemarkError::file_unavailable(&display, e.to_string()))?;
    if !metadata.is_file() {
        return Err(PagemarkError::file_unavailable(display, "not a regular file"));
    }

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).await.is_ok() && &magic != b"%PDF" {
        return Err(PagemarkError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(SourceDocument::new(path.to_path_buf()))
}

/// Download a URL into `dest_dir` and return the local copy.
pub async fn download(
    url: &str,
    dest_dir: &Path,
    timeout_secs: u64,
) -> Result<SourceDocument, PagemarkError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PagemarkError::Internal(format!("HTTP client: {}", e)))?;

    let response = client.get(url).send().await.map_err(|e| {
        let reason = if e.is_timeout() {
            format!("download timed out after {}s", timeout_secs)
        } else {
            e.to_string()
        };
        PagemarkError::file_unavailable(url, reason)
    })?;

    if !response.status().is_success() {
        return Err(PagemarkError::file_unavailable(
            url,
            format!("HTTP {}", response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PagemarkError::file_unavailable(url, e.to_string()))?;

    let file_path = dest_dir.join(filename_from_url(url));

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(PagemarkError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PagemarkError::Internal(format!("Failed to write downloaded file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());
    Ok(SourceDocument::new(file_path))
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn empty_input_is_unavailable() {
        assert!(matches!(
            InputRef::parse(""),
            Err(PagemarkError::FileUnavailable { .. })
        ));
        assert!(matches!(
            InputRef::parse("   "),
            Err(PagemarkError::FileUnavailable { .. })
        ));
    }

    #[test]
    fn parse_classifies_inputs() {
        assert_eq!(
            InputRef::parse("https://arxiv.org/pdf/1706.03762").unwrap(),
            InputRef::Remote("https://arxiv.org/pdf/1706.03762".into())
        );
        assert_eq!(
            InputRef::parse("docs/a.pdf").unwrap(),
            InputRef::Local(PathBuf::from("docs/a.pdf"))
        );
    }

    #[test]
    fn sanitize_replaces_each_non_alnum_char() {
        assert_eq!(sanitize_file_name("Report (Final)!"), "report__final__");
        assert_eq!(sanitize_file_name("Q3-2024 Summary"), "q3_2024_summary");
        assert_eq!(sanitize_file_name("plain"), "plain");
        assert_eq!(sanitize_file_name(""), "");
    }

    #[test]
    fn file_name_uses_stem_only() {
        let doc = SourceDocument::new(PathBuf::from("/tmp/x/Report (Final)!.pdf"));
        assert_eq!(doc.file_name, "report__final__");
    }

    #[test]
    fn filename_from_url_segments() {
        assert_eq!(filename_from_url("https://host/a/b/paper.pdf"), "paper.pdf");
        assert_eq!(filename_from_url("https://arxiv.org/pdf/1706"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://host/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn resolve_local_missing_file() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PagemarkError::FileUnavailable { .. }));
    }

    #[tokio::test]
    async fn resolve_local_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello world").unwrap();
        let err = resolve_local(&path).await.unwrap_err();
        assert!(matches!(err, PagemarkError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn resolve_local_accepts_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Annual Report.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        let doc = resolve_local(&path).await.unwrap();
        assert_eq!(doc.path, path);
        assert_eq!(doc.file_name, "annual_report");
    }
}
