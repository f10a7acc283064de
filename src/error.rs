//! Error types for the edgequake-defects library.
//!
//! Failures are split by the blast radius they are allowed to have:
//!
//! * [`InspectError`] — **Fatal for the batch**: nothing can be analysed
//!   (no provider credential, invalid configuration, PDFium missing).
//!   Returned as `Err(InspectError)` from [`crate::analyze::analyze`].
//!
//! * [`DocumentOpenError`] — **Fatal for one document**: the bytes could not
//!   be opened or rendered. Stored in the document's
//!   [`crate::output::DocumentReport`]; the batch carries on with the next
//!   document.
//!
//! * [`ExtractionParseError`] and [`ClassificationError`] — **Recovered**:
//!   a page or a single candidate degraded. They never leave the pipeline as
//!   errors; the extractor turns them into an empty candidate list and the
//!   classifier into a fallback result. They exist so the degradation can be
//!   logged and counted.
//!
//! * [`ServiceError`] — a reasoning-service call failed. The retry loop in
//!   [`crate::pipeline::llm`] uses the variant to decide whether another
//!   attempt is worthwhile.

use edgequake_llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

/// All batch-fatal errors returned by the edgequake-defects library.
#[derive(Debug, Error)]
pub enum InspectError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// No usable reasoning-service credential or provider could be resolved.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    Configuration { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium into a system\n\
library directory, then try again.\n"
    )]
    PdfiumBindingFailed(String),

    /// The batch contained no documents.
    #[error("No input documents were given")]
    EmptyBatch,

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The spreadsheet writer rejected the workbook.
    #[error("Spreadsheet export failed: {0}")]
    ExportFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rust_xlsxwriter::XlsxError> for InspectError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        InspectError::ExportFailed(e.to_string())
    }
}

/// A document could not be opened or rasterised.
///
/// Stored alongside [`crate::output::DocumentReport`] for the failed
/// document. The document contributes zero records; the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentOpenError {
    /// The bytes do not start with the `%PDF` signature.
    #[error("not a PDF document (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("document is corrupt: {detail}")]
    Corrupt { detail: String },

    /// PDF requires a password but none was provided.
    #[error("document is encrypted and requires a password")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("wrong password for encrypted document")]
    WrongPassword,

    /// pdfium returned an error for a specific page.
    #[error("rasterisation failed for page {page}: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The input could not be read at all (missing file, failed download).
    #[error("document could not be read: {reason}")]
    Unreadable { reason: String },

    /// The rendering task itself failed (panic, library bind failure).
    #[error("rasteriser failure: {0}")]
    Internal(String),
}

/// Why a page's extraction response degraded to an empty candidate list.
#[derive(Debug, Clone, Error)]
pub enum ExtractionParseError {
    /// The page image could not be PNG-encoded for the request.
    #[error("page image could not be encoded: {0}")]
    Encode(String),

    /// The service call failed or timed out.
    #[error("vision request failed: {0}")]
    Service(#[from] ServiceError),

    /// No JSON array could be located in the response text.
    #[error("no JSON array found in response")]
    NoPayload,

    /// A candidate array was located but did not decode.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
}

/// Why a candidate's classification fell back to `ClassificationError`.
#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    /// The service call failed or timed out.
    #[error("classification request failed: {0}")]
    Service(#[from] ServiceError),

    /// No JSON object could be located in the response text.
    #[error("no JSON object found in response")]
    NoPayload,

    /// A JSON object was located but did not decode.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
}

/// A single reasoning-service call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The call exceeded the per-call timeout. Not retried.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Rate limit, 5xx or dropped connection; retried.
    #[error("transient service error: {0}")]
    Transient(String),

    /// Authentication, permission or malformed request; never retried.
    #[error("service rejected the request: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Whether the retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

impl From<LlmError> for ServiceError {
    /// Rate limits, network failures, provider-side timeouts and 5xx API
    /// errors are transient. Everything else (auth, unknown model, invalid
    /// request, token limit, configuration) is rejected outright.
    fn from(e: LlmError) -> Self {
        let transient = match &e {
            LlmError::RateLimited(_) | LlmError::NetworkError(_) | LlmError::Timeout => true,
            LlmError::ApiError(msg) => is_server_error(msg),
            _ => false,
        };
        if transient {
            ServiceError::Transient(e.to_string())
        } else {
            ServiceError::Rejected(e.to_string())
        }
    }
}

fn is_server_error(message: &str) -> bool {
    ["500", "502", "503", "504", "529"]
        .iter()
        .any(|code| message.contains(code))
        || message.to_lowercase().contains("overloaded")
}
