//! Batch analysis entry points and the per-document state machine.
//!
//! ```text
//! Pending ─▶ Rasterizing ─▶ (ExtractingPage_i ─▶ ClassifyingCandidate_i,1..k)* ─▶ Done
//!                 └──────▶ Failed
//! ```
//!
//! A document that cannot be opened ends in `Failed`, contributes no records
//! and the batch moves on. Degraded pages and candidates never stop a
//! document from reaching `Done`.
//!
//! ## Ordering
//!
//! Documents are processed one after another. Within a document, pages and
//! then the candidates of each page go through `buffered` streams, which
//! yield in submission order, so records come out as
//! `(document, page, extraction_order)` whatever the concurrency. The
//! in-flight limit itself is enforced by the shared [`ServiceClient`].

use crate::config::{AnalysisConfig, DEFAULT_MODEL};
use crate::error::{DocumentOpenError, InspectError};
use crate::output::{
    BatchResult, BatchStats, Classification, ClassifiedDefectRecord, DocumentReport,
    DocumentStatus, Provenance,
};
use crate::pipeline::classify::DefectClassifier;
use crate::pipeline::extract::DefectExtractor;
use crate::pipeline::input::{self, LoadedSource, SourceDocument, UnreadableSource};
use crate::pipeline::llm::{LlmService, ReasoningService, RetryPolicy, ServiceClient};
use crate::pipeline::render::{DocumentRasterizer, PdfiumRasterizer, RasterImage};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::prompts::{DEFAULT_CLASSIFICATION_PROMPT, DEFAULT_EXTRACTION_PROMPT};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Analyse a batch of in-memory documents.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(BatchResult)` whenever the batch could start, even if individual
/// documents failed to open (see [`BatchResult::failed_documents`]).
///
/// # Errors
/// Only batch-fatal problems: an empty batch, no resolvable reasoning
/// service, or no pdfium library.
pub async fn analyze(
    documents: Vec<SourceDocument>,
    config: &AnalysisConfig,
) -> Result<BatchResult, InspectError> {
    if documents.is_empty() {
        return Err(InspectError::EmptyBatch);
    }
    let pipeline = DefectPipeline::from_config(config)?;
    Ok(pipeline.run(documents).await)
}

/// Load local paths or URLs, then analyse them.
///
/// An input that cannot be read ends up as a failed [`DocumentReport`]
/// in its batch position; the other inputs are analysed as usual.
pub async fn analyze_inputs<S: AsRef<str>>(
    inputs: &[S],
    config: &AnalysisConfig,
) -> Result<BatchResult, InspectError> {
    if inputs.is_empty() {
        return Err(InspectError::EmptyBatch);
    }
    let pipeline = DefectPipeline::from_config(config)?;
    let loaded = input::load_sources(inputs, config.download_timeout_secs).await;
    Ok(pipeline.run_loaded(loaded).await)
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    documents: Vec<SourceDocument>,
    config: &AnalysisConfig,
) -> Result<BatchResult, InspectError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InspectError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(documents, config))
}

/// Runs batches through rasterisation, extraction and classification.
pub struct DefectPipeline {
    rasterizer: Arc<dyn DocumentRasterizer>,
    extractor: DefectExtractor,
    classifier: DefectClassifier,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

/// What one page contributed.
struct PageOutcome {
    page_number: usize,
    records: Vec<ClassifiedDefectRecord>,
    dropped: usize,
    degraded: bool,
}

impl DefectPipeline {
    /// Assemble a pipeline from explicit seams.
    pub fn new(
        rasterizer: Arc<dyn DocumentRasterizer>,
        service: Arc<dyn ReasoningService>,
        config: &AnalysisConfig,
    ) -> Self {
        let client = ServiceClient::new(
            service,
            config.concurrency,
            RetryPolicy::from_config(config),
        );
        let extractor = DefectExtractor::new(
            client.clone(),
            config
                .extraction_prompt
                .as_deref()
                .unwrap_or(DEFAULT_EXTRACTION_PROMPT),
            config.extraction_temperature,
            config.extraction_max_tokens,
        );
        let classifier = DefectClassifier::new(
            client,
            config
                .classification_prompt
                .as_deref()
                .unwrap_or(DEFAULT_CLASSIFICATION_PROMPT),
            config.classification_temperature,
            config.classification_max_tokens,
        );
        Self {
            rasterizer,
            extractor,
            classifier,
            concurrency: config.concurrency.max(1),
            progress: config.progress_callback.clone(),
        }
    }

    /// Use `rasterizer`, resolving the reasoning service from `config`.
    pub fn with_rasterizer(
        rasterizer: Arc<dyn DocumentRasterizer>,
        config: &AnalysisConfig,
    ) -> Result<Self, InspectError> {
        let service = resolve_service(config)?;
        Ok(Self::new(rasterizer, service, config))
    }

    /// Production pipeline: resolved service plus the pdfium rasteriser.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, InspectError> {
        let service = resolve_service(config)?;
        let rasterizer = PdfiumRasterizer::new(
            config.render_scale,
            config.max_rendered_pixels,
            config.password.clone(),
        )?;
        Ok(Self::new(Arc::new(rasterizer), service, config))
    }

    /// Process every document in input order.
    pub async fn run(&self, documents: Vec<SourceDocument>) -> BatchResult {
        self.run_loaded(documents.into_iter().map(Ok).collect()).await
    }

    /// Process the output of [`input::load_sources`] in input order.
    ///
    /// Unreadable slots are reported as failed documents.
    pub async fn run_loaded(&self, documents: Vec<LoadedSource>) -> BatchResult {
        let total_start = Instant::now();
        let document_count = documents.len();
        info!(
            "Starting analysis: {} documents, concurrency {}",
            document_count, self.concurrency
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(document_count);
        }

        let mut result = BatchResult::default();
        let mut stats = BatchStats {
            total_documents: document_count,
            ..Default::default()
        };

        for (idx, slot) in documents.into_iter().enumerate() {
            let (records, report, render_ms) = match slot {
                Ok(doc) => self.process_document(idx + 1, document_count, doc).await,
                Err(unreadable) => self.report_unreadable(idx + 1, document_count, unreadable),
            };

            stats.render_duration_ms += render_ms;
            if let DocumentStatus::Done { page_count } = report.status {
                stats.total_pages += page_count;
            } else {
                stats.failed_documents += 1;
            }
            stats.degraded_pages += report.degraded_pages.len();
            stats.classification_failures += report.classification_failures;

            result.records.extend(records);
            result.documents.push(report);
        }

        stats.total_records = result.records.len();
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Analysis complete: {} records from {}/{} documents in {}ms",
            stats.total_records,
            document_count - stats.failed_documents,
            document_count,
            stats.total_duration_ms
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(document_count, stats.total_records);
        }

        result.stats = stats;
        result
    }

    async fn process_document(
        &self,
        position: usize,
        document_count: usize,
        doc: SourceDocument,
    ) -> (Vec<ClassifiedDefectRecord>, DocumentReport, u64) {
        let SourceDocument { filename, bytes } = doc;
        info!("[{}/{}] {}", position, document_count, filename);
        if let Some(ref cb) = self.progress {
            cb.on_document_start(position, document_count, &filename);
        }

        // ── Rasterise (blocking pool; bytes are dropped with the task) ────
        let render_start = Instant::now();
        let rasterizer = Arc::clone(&self.rasterizer);
        let rendered = tokio::task::spawn_blocking(move || rasterizer.rasterize(&bytes))
            .await
            .unwrap_or_else(|e| {
                Err(DocumentOpenError::Internal(format!(
                    "rasterisation task failed: {e}"
                )))
            });
        let render_ms = render_start.elapsed().as_millis() as u64;

        let pages = match rendered {
            Ok(pages) => pages,
            Err(error) => {
                warn!("{}: document could not be opened — {}", filename, error);
                let status = format!("{filename}: failed ({error})");
                let report = DocumentReport::failed(filename, error);
                self.emit_document_complete(position, document_count, 0, status);
                return (Vec::new(), report, render_ms);
            }
        };

        let page_count = pages.len();
        debug!("{}: rendered {} pages in {}ms", filename, page_count, render_ms);

        // ── Extract + classify, page by page in canonical order ──────────
        let mut records = Vec::new();
        let mut degraded_pages = Vec::new();
        let mut dropped_candidates = 0;
        let mut classification_failures = 0;

        let filename_ref = filename.as_str();
        let mut outcomes = std::pin::pin!(stream::iter(
            pages
                .into_iter()
                .map(|page| self.process_page(filename_ref, page, page_count))
        )
        .buffered(self.concurrency));

        while let Some(outcome) = outcomes.next().await {
            if outcome.degraded {
                degraded_pages.push(outcome.page_number);
            }
            dropped_candidates += outcome.dropped;
            classification_failures += outcome
                .records
                .iter()
                .filter(|r| r.classification == Classification::ClassificationError)
                .count();

            if let Some(ref cb) = self.progress {
                cb.on_page_complete(&ProgressEvent {
                    document_index: position,
                    document_count,
                    page_index: outcome.page_number,
                    page_count,
                    status: format!(
                        "{}: page {}/{} ({} defects)",
                        filename_ref,
                        outcome.page_number,
                        page_count,
                        outcome.records.len()
                    ),
                });
            }
            records.extend(outcome.records);
        }

        let report = DocumentReport {
            filename: filename.clone(),
            status: DocumentStatus::Done { page_count },
            record_count: records.len(),
            degraded_pages,
            dropped_candidates,
            classification_failures,
        };
        info!(
            "{}: {} defects from {} pages ({} degraded)",
            filename,
            report.record_count,
            page_count,
            report.degraded_pages.len()
        );
        self.emit_document_complete(
            position,
            document_count,
            page_count,
            format!("{filename}: {} defects", report.record_count),
        );

        (records, report, render_ms)
    }

    fn report_unreadable(
        &self,
        position: usize,
        document_count: usize,
        unreadable: UnreadableSource,
    ) -> (Vec<ClassifiedDefectRecord>, DocumentReport, u64) {
        let UnreadableSource { filename, error } = unreadable;
        warn!("{}: document could not be read — {}", filename, error);
        if let Some(ref cb) = self.progress {
            cb.on_document_start(position, document_count, &filename);
        }
        let status = format!("{filename}: failed ({error})");
        self.emit_document_complete(position, document_count, 0, status);
        (Vec::new(), DocumentReport::failed(filename, error), 0)
    }

    async fn process_page(
        &self,
        filename: &str,
        page: RasterImage,
        page_count: usize,
    ) -> PageOutcome {
        let page_number = page.page_number;
        let label = format!("{filename} page {page_number}/{page_count}");

        let (candidates, degraded) = match self.extractor.extract_checked(&page, &label).await {
            Ok(candidates) => (candidates, false),
            Err(e) => {
                warn!("{}: extraction degraded to no candidates — {}", label, e);
                (Vec::new(), true)
            }
        };
        drop(page);

        // The order index is taken before empty descriptions are removed.
        let extracted = candidates.len();
        let kept: Vec<_> = candidates
            .into_iter()
            .enumerate()
            .filter(|(_, c)| c.has_description())
            .collect();
        let dropped = extracted - kept.len();
        if dropped > 0 {
            debug!("{}: dropped {} candidates without description", label, dropped);
        }

        let records = stream::iter(kept.into_iter().map(move |(order, candidate)| {
            let label = format!("{label} defect {}", order + 1);
            async move {
                let result = self
                    .classifier
                    .classify(&candidate.description, candidate.code.as_deref(), &label)
                    .await;
                ClassifiedDefectRecord::new(
                    candidate,
                    result,
                    Provenance {
                        source_filename: filename.to_string(),
                        page_number,
                        extraction_order: order,
                    },
                )
            }
        }))
        .buffered(self.concurrency)
        .collect::<Vec<_>>()
        .await;

        PageOutcome {
            page_number,
            records,
            dropped,
            degraded,
        }
    }

    fn emit_document_complete(
        &self,
        position: usize,
        document_count: usize,
        page_count: usize,
        status: String,
    ) {
        if let Some(ref cb) = self.progress {
            cb.on_document_complete(&ProgressEvent {
                document_index: position,
                document_count,
                page_index: page_count,
                page_count,
                status,
            });
        }
    }
}

// ── Service resolution ───────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InspectError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InspectError::Configuration {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the reasoning service, from most-specific to least-specific.
///
/// 1. **Pre-built service** (`config.service`), used as-is. This is how
///    tests and callers with their own backend plug in.
/// 2. **Pre-built provider** (`config.provider`), wrapped in [`LlmService`].
/// 3. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the factory reads the matching API key.
/// 4. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 5. **`OPENAI_API_KEY`** present → OpenAI.
/// 6. **Full auto-detection** via `ProviderFactory::from_env`.
///
/// Fails with [`InspectError::Configuration`] before any document is touched.
pub fn resolve_service(config: &AnalysisConfig) -> Result<Arc<dyn ReasoningService>, InspectError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }
    let provider = resolve_provider(config)?;
    debug!("Reasoning service resolved from provider configuration");
    Ok(Arc::new(LlmService::new(provider)))
}

fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, InspectError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, config.model.as_deref().unwrap_or(&model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InspectError::Configuration {
            provider: "auto".to_string(),
            hint: format!(
                "No reasoning service could be auto-detected from the environment.\n\
                Set OPENAI_API_KEY (model {DEFAULT_MODEL} by default), ANTHROPIC_API_KEY, \
                or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
