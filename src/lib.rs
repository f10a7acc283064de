//! # edgequake-defects
//!
//! Extract and classify defects from lift inspection reports using vision
//! language models.
//!
//! ## Why this crate?
//!
//! Inspection reports come from many bodies, in many layouts and languages:
//! defect tables, numbered lists, free-text remarks, scanned or born-digital.
//! Template-based parsers break on the next report format. Instead each page
//! is rasterised and read by a vision model, and every defect found is then
//! classified as site-related (building, shaft, power supply) or
//! equipment-related (the lift and its documentation), with an English
//! translation and full provenance back to file and page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Input     load local files or download URLs
//!  ├─ 2. Render    rasterise every page via pdfium (spawn_blocking)
//!  ├─ 3. Extract   one vision call per page → defect candidates
//!  ├─ 4. Classify  one text call per candidate → origin, confidence, translation
//!  └─ 5. Result    ordered records + per-document reports + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_defects::{analyze_inputs, AnalysisConfig, Classification, RecordFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let result = analyze_inputs(&["inspection.pdf"], &config).await?;
//!
//!     let site = RecordFilter::new().classification(Classification::SiteRelated);
//!     for record in result.filter(&site) {
//!         println!("p{} {}", record.page(), record.description);
//!     }
//!     edgequake_defects::export::write_xlsx(&result.records, "analysis.xlsx")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2defects` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-defects = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_inputs, analyze_sync, resolve_service, DefectPipeline};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, DEFAULT_MODEL};
pub use error::{
    ClassificationError, DocumentOpenError, ExtractionParseError, InspectError, ServiceError,
};
pub use output::{
    group_by_file, BatchResult, BatchStats, Classification, ClassificationResult,
    ClassifiedDefectRecord, Confidence, DocumentReport, DocumentStatus, FlatRecord, Provenance,
    RawDefectCandidate, RecordFilter, ResultSummary,
};
pub use pipeline::classify::DefectClassifier;
pub use pipeline::extract::DefectExtractor;
pub use pipeline::input::{
    load_source, load_sources, LoadedSource, SourceDocument, UnreadableSource,
};
pub use pipeline::llm::{LlmService, ReasoningService, RetryPolicy, ServiceClient, ServiceRequest};
pub use pipeline::render::{DocumentRasterizer, PdfiumRasterizer, RasterImage};
pub use progress::{
    AnalysisProgressCallback, ChannelProgress, NoopProgressCallback, ProgressCallback,
    ProgressEvent,
};
