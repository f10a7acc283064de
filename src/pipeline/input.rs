//! Input loading: turn a user-supplied path or URL into a [`SourceDocument`].
//!
//! Documents are held in memory as bytes. Validation of the content itself
//! (magic bytes, encryption) is left to the rasteriser. Problems reaching
//! the bytes at all (missing file, HTTP error) are reported here; in a batch
//! they become an [`UnreadableSource`] that fails only its own document.

use crate::error::{DocumentOpenError, InspectError};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One document in a batch: a display name plus its raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Name used in record provenance, normally the file's base name.
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load one input, downloading it when it is a URL.
pub async fn load_source(input: &str, timeout_secs: u64) -> Result<SourceDocument, InspectError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(Path::new(input)).await
    }
}

/// An input of a batch whose bytes could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableSource {
    /// Base name of the path, or the URL as given.
    pub filename: String,
    pub error: DocumentOpenError,
}

/// One batch slot after loading: the document, or why it could not be read.
pub type LoadedSource = Result<SourceDocument, UnreadableSource>;

/// Load several inputs in order, one slot per input.
///
/// An input that cannot be read does not stop the others.
pub async fn load_sources<S: AsRef<str>>(inputs: &[S], timeout_secs: u64) -> Vec<LoadedSource> {
    let mut loaded = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        let slot = load_source(input, timeout_secs).await.map_err(|e| {
            warn!("{}: {}", input, e);
            UnreadableSource {
                filename: input_name(input),
                error: DocumentOpenError::Unreadable {
                    reason: e.to_string(),
                },
            }
        });
        loaded.push(slot);
    }
    loaded
}

fn input_name(input: &str) -> String {
    if is_url(input) {
        input.to_string()
    } else {
        display_name(Path::new(input))
    }
}

async fn load_local(path: &Path) -> Result<SourceDocument, InspectError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => InspectError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => InspectError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(SourceDocument::new(display_name(path), bytes))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, InspectError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InspectError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            InspectError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InspectError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(InspectError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| filename_from_url(url));

    let bytes = response.bytes().await.map_err(map_send_err)?;
    info!("Downloaded {} ({} bytes)", filename, bytes.len());

    Ok(SourceDocument::new(filename, bytes.to_vec()))
}

/// `attachment; filename="report.pdf"` → `report.pdf`.
fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://example.com/a/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://example.com/download"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://example.com/"), "downloaded.pdf");
    }

    #[test]
    fn filename_from_disposition_header() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"TÜV-2024.pdf\"").as_deref(),
            Some("TÜV-2024.pdf")
        );
        assert_eq!(filename_from_disposition("inline"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
    }

    #[tokio::test]
    async fn loads_local_file_with_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inspection.pdf");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"%PDF-1.4 test")
            .unwrap();

        let doc = load_source(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.filename, "inspection.pdf");
        assert_eq!(doc.bytes, b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn unreadable_input_keeps_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        std::fs::write(&good, b"%PDF-1.4 good").unwrap();
        let missing = dir.path().join("missing.pdf");

        let inputs = [
            missing.to_string_lossy().to_string(),
            good.to_string_lossy().to_string(),
        ];
        let loaded = load_sources(&inputs, 5).await;

        assert_eq!(loaded.len(), 2);
        let unreadable = loaded[0].as_ref().unwrap_err();
        assert_eq!(unreadable.filename, "missing.pdf");
        assert!(matches!(unreadable.error, DocumentOpenError::Unreadable { .. }));
        assert_eq!(loaded[1].as_ref().unwrap().filename, "good.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_source("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, InspectError::FileNotFound { .. }));
    }
}
