//! Orchestrator integration tests with a stub rasteriser and a scripted
//! reasoning service. No pdfium library or API key is needed.
//!
//! The stub rasteriser paints every page with the colour
//! `(document_id, page_number, 0)`. The scripted service decodes the PNG it
//! receives and answers from a table keyed on that colour, so responses are
//! fixed per page no matter in which order calls arrive.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_defects::{
    load_sources, AnalysisConfig, BatchResult, ChannelProgress, Classification, Confidence,
    DefectPipeline, DocumentOpenError, DocumentRasterizer, DocumentStatus, ProgressCallback,
    RasterImage, ReasoningService, RecordFilter, ServiceError, ServiceRequest, SourceDocument,
};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Stubs ────────────────────────────────────────────────────────────────────

/// Document bytes are `doc=<id>;pages=<n>`; anything else fails to open.
struct StubRasterizer;

impl DocumentRasterizer for StubRasterizer {
    fn rasterize(&self, document: &[u8]) -> Result<Vec<RasterImage>, DocumentOpenError> {
        let text = std::str::from_utf8(document).map_err(|_| DocumentOpenError::Corrupt {
            detail: "binary".into(),
        })?;
        let mut doc = None;
        let mut pages = None;
        for part in text.split(';') {
            match part.split_once('=') {
                Some(("doc", v)) => doc = v.parse::<u8>().ok(),
                Some(("pages", v)) => pages = v.parse::<u8>().ok(),
                _ => {}
            }
        }
        match (doc, pages) {
            (Some(doc), Some(pages)) => Ok((1..=pages)
                .map(|p| RasterImage::new(p as usize, RgbImage::from_pixel(4, 4, Rgb([doc, p, 0]))))
                .collect()),
            _ => Err(DocumentOpenError::Corrupt {
                detail: format!("unreadable: {text}"),
            }),
        }
    }
}

/// Answers extraction requests from `pages` and classification requests
/// from the description.
///
/// Classification script, by description:
/// * starting with "Schacht" or "Shaft" → SiteRelated / Medium
/// * "REJECT" → service rejects the call
/// * "GARBAGE" → unparseable answer
/// * anything else → EquipmentRelated / High
#[derive(Default)]
struct ScriptedService {
    pages: HashMap<(u8, u8), String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    jitter: bool,
}

impl ScriptedService {
    fn new() -> Self {
        Self::default()
    }

    fn page(mut self, doc: u8, page: u8, response: &str) -> Self {
        self.pages.insert((doc, page), response.to_string());
        self
    }

    fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn page_key(request: &ServiceRequest) -> (u8, u8) {
        let image = request.image.as_ref().expect("vision request");
        let png = STANDARD.decode(&image.data).expect("base64");
        let bitmap = image::load_from_memory(&png).expect("png").to_rgb8();
        let px = bitmap.get_pixel(0, 0);
        (px[0], px[1])
    }

    fn description(prompt: &str) -> String {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix("Defect description: "))
            .unwrap_or_default()
            .to_string()
    }

    fn answer(&self, request: &ServiceRequest) -> Result<String, ServiceError> {
        if request.image.is_some() {
            let key = Self::page_key(request);
            return Ok(self.pages.get(&key).cloned().unwrap_or_else(|| "[]".into()));
        }

        let description = Self::description(&request.prompt);
        let site = description.starts_with("Schacht") || description.starts_with("Shaft");
        let (class, conf) = if site {
            ("SiteRelated", "Medium")
        } else if description == "REJECT" {
            return Err(ServiceError::Rejected("403 forbidden".into()));
        } else if description == "GARBAGE" {
            return Ok("I think this is equipment.".into());
        } else {
            ("EquipmentRelated", "High")
        };
        Ok(format!(
            "```json\n{{\"classification\": \"{class}\", \"confidence\": \"{conf}\", \
             \"reasoning\": \"scripted\", \"english_translation\": \"EN {description}\"}}\n```"
        ))
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn complete(&self, request: &ServiceRequest) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.jitter {
            // Later submissions finish first, to shake up completion order.
            let n = self.calls.load(Ordering::SeqCst) as u64;
            tokio::time::sleep(Duration::from_millis(15u64.saturating_sub(n % 15))).await;
        }

        let answer = self.answer(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn doc(name: &str, id: u8, pages: u8) -> SourceDocument {
    SourceDocument::new(name, format!("doc={id};pages={pages}").into_bytes())
}

fn config(service: Arc<ScriptedService>, concurrency: usize) -> AnalysisConfig {
    AnalysisConfig::builder()
        .service(service)
        .concurrency(concurrency)
        .max_retries(1)
        .retry_backoff_ms(0)
        .build()
        .unwrap()
}

async fn run(
    service: Arc<ScriptedService>,
    concurrency: usize,
    docs: Vec<SourceDocument>,
) -> BatchResult {
    let config = config(service, concurrency);
    DefectPipeline::with_rasterizer(Arc::new(StubRasterizer), &config)
        .unwrap()
        .run(docs)
        .await
}

/// A multi-document script with several candidates per page.
fn busy_service() -> ScriptedService {
    ScriptedService::new()
        .page(1, 1, r#"[{"number": "1", "description": "Brake pads worn"}, {"number": "2", "description": "Schacht undicht"}]"#)
        .page(1, 3, r#"[{"number": "3", "description": "Door sensor faulty"}]"#)
        .page(
            2,
            1,
            r#"Found: [{"description": "Shaft lighting missing"}, {"description": "Logbook incomplete"}, {"description": "Rope tension uneven"}]"#,
        )
        .page(2, 2, r#"[{"description": "Emergency call not tested", "code": 901}]"#)
}

fn positions(result: &BatchResult) -> Vec<(String, usize, usize)> {
    result
        .records
        .iter()
        .map(|r| {
            (
                r.provenance.source_filename.clone(),
                r.provenance.page_number,
                r.provenance.extraction_order,
            )
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_defect_report_end_to_end() {
    let service = Arc::new(ScriptedService::new().page(
        1,
        1,
        r#"[{"number": "1", "code": "12", "description": "Door sensor faulty", "severity": "minor"}]"#,
    ));
    let result = run(service, 1, vec![doc("report.pdf", 1, 2)]).await;

    assert_eq!(result.records.len(), 1);
    let r = &result.records[0];
    assert_eq!(r.provenance.source_filename, "report.pdf");
    assert_eq!(r.provenance.page_number, 1);
    assert_eq!(r.provenance.extraction_order, 0);
    assert_eq!(r.number.as_deref(), Some("1"));
    assert_eq!(r.code.as_deref(), Some("12"));
    assert_eq!(r.severity.as_deref(), Some("minor"));
    assert_eq!(r.description, "Door sensor faulty");
    assert_eq!(r.classification, Classification::EquipmentRelated);
    assert_eq!(r.confidence, Confidence::High);
    assert_eq!(r.english_translation, "EN Door sensor faulty");

    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].status, DocumentStatus::Done { page_count: 2 });
    assert!(result.documents[0].degraded_pages.is_empty());
    assert_eq!(result.stats.total_pages, 2);
    assert_eq!(result.stats.total_records, 1);
}

#[tokio::test]
async fn records_follow_document_page_extraction_order() {
    let service = Arc::new(busy_service());
    let result = run(service, 1, vec![doc("a.pdf", 1, 3), doc("b.pdf", 2, 2)]).await;

    let expected: Vec<(String, usize, usize)> = vec![
        ("a.pdf".into(), 1, 0),
        ("a.pdf".into(), 1, 1),
        ("a.pdf".into(), 3, 0),
        ("b.pdf".into(), 1, 0),
        ("b.pdf".into(), 1, 1),
        ("b.pdf".into(), 1, 2),
        ("b.pdf".into(), 2, 0),
    ];
    assert_eq!(positions(&result), expected);
    assert_eq!(result.records[1].classification, Classification::SiteRelated);
    assert_eq!(result.records[6].code.as_deref(), Some("901"));
}

#[tokio::test]
async fn concurrency_does_not_change_output() {
    let docs = || vec![doc("a.pdf", 1, 3), doc("b.pdf", 2, 2)];

    let sequential = run(Arc::new(busy_service()), 1, docs()).await;

    let service = Arc::new(busy_service().with_jitter());
    let concurrent = run(Arc::clone(&service), 4, docs()).await;

    assert_eq!(sequential.records, concurrent.records);
    assert_eq!(sequential.documents, concurrent.documents);
    assert!(service.max_in_flight.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn sequential_baseline_has_one_call_in_flight() {
    let service = Arc::new(busy_service().with_jitter());
    run(Arc::clone(&service), 1, vec![doc("a.pdf", 1, 3)]).await;
    assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_runs_serialize_identically() {
    let once = || {
        tokio_test::block_on(run(
            Arc::new(busy_service()),
            2,
            vec![doc("a.pdf", 1, 3), doc("b.pdf", 2, 2)],
        ))
    };
    let first = serde_json::to_string(&once().records).unwrap();
    let second = serde_json::to_string(&once().records).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unreadable_document_does_not_stop_batch() {
    let service = Arc::new(busy_service());
    let docs = vec![
        doc("a.pdf", 1, 3),
        SourceDocument::new("broken.pdf", b"\x00\x01garbage".to_vec()),
        doc("b.pdf", 2, 2),
    ];
    let result = run(service, 1, docs).await;

    assert_eq!(result.documents.len(), 3);
    assert!(!result.documents[0].is_failed());
    assert!(result.documents[1].is_failed());
    assert!(matches!(
        result.documents[1].status,
        DocumentStatus::Failed {
            error: DocumentOpenError::Corrupt { .. }
        }
    ));
    assert_eq!(result.documents[1].record_count, 0);
    assert!(!result.documents[2].is_failed());

    assert_eq!(result.stats.failed_documents, 1);
    assert_eq!(result.records.len(), 7);
    assert!(result.records.iter().all(|r| r.file() != "broken.pdf"));
    assert_eq!(result.failed_documents().count(), 1);
}

#[tokio::test]
async fn missing_input_fails_only_its_own_slot() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.pdf");
    let last = dir.path().join("b.pdf");
    std::fs::write(&first, "doc=1;pages=3").unwrap();
    std::fs::write(&last, "doc=2;pages=2").unwrap();
    let inputs = [
        first.to_string_lossy().to_string(),
        dir.path().join("missing.pdf").to_string_lossy().to_string(),
        last.to_string_lossy().to_string(),
    ];

    let loaded = load_sources(&inputs, 5).await;
    let config = config(Arc::new(busy_service()), 1);
    let result = DefectPipeline::with_rasterizer(Arc::new(StubRasterizer), &config)
        .unwrap()
        .run_loaded(loaded)
        .await;

    let names: Vec<&str> = result.documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["a.pdf", "missing.pdf", "b.pdf"]);
    assert!(matches!(
        result.documents[1].status,
        DocumentStatus::Failed {
            error: DocumentOpenError::Unreadable { .. }
        }
    ));
    assert_eq!(result.stats.failed_documents, 1);
    assert_eq!(result.records.len(), 7);
    assert!(result.records.iter().any(|r| r.file() == "b.pdf"));
}

#[tokio::test]
async fn unusable_page_response_degrades_only_that_page() {
    let service = Arc::new(
        ScriptedService::new()
            .page(1, 1, r#"[{"description": "Brake pads worn"}]"#)
            .page(1, 2, "Sorry, I cannot read this page.")
            .page(1, 3, r#"[{"description": "Door sensor faulty"}]"#),
    );
    let result = run(service, 1, vec![doc("a.pdf", 1, 3)]).await;

    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0].page(), 1);
    assert_eq!(result.records[1].page(), 3);
    assert_eq!(result.documents[0].degraded_pages, vec![2]);
    assert_eq!(result.documents[0].status, DocumentStatus::Done { page_count: 3 });
    assert_eq!(result.stats.degraded_pages, 1);
}

#[tokio::test]
async fn empty_descriptions_are_dropped_before_classification() {
    let service = Arc::new(ScriptedService::new().page(
        1,
        1,
        r#"[{"number": "1", "description": ""}, {"number": "2", "description": "Brake pads worn"}, {"number": "3", "description": null}]"#,
    ));
    let result = run(Arc::clone(&service), 1, vec![doc("a.pdf", 1, 1)]).await;

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].number.as_deref(), Some("2"));
    assert_eq!(result.records[0].provenance.extraction_order, 1);
    assert_eq!(result.documents[0].dropped_candidates, 2);
    // One extraction call plus one classification call.
    assert_eq!(service.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn classification_failures_become_fallback_records() {
    let service = Arc::new(ScriptedService::new().page(
        1,
        1,
        r#"[{"description": "REJECT"}, {"description": "GARBAGE"}, {"description": "Brake pads worn"}]"#,
    ));
    let result = run(service, 1, vec![doc("a.pdf", 1, 1)]).await;

    assert_eq!(result.records.len(), 3);
    for r in &result.records[..2] {
        assert_eq!(r.classification, Classification::ClassificationError);
        assert_eq!(r.confidence, Confidence::Low);
        assert!(r.reasoning.starts_with("Error: "));
        assert_eq!(r.english_translation, "");
    }
    assert_eq!(result.records[2].classification, Classification::EquipmentRelated);
    assert_eq!(result.documents[0].classification_failures, 2);
    assert_eq!(result.stats.classification_failures, 2);
}

#[tokio::test]
async fn filter_and_summary_over_batch() {
    let service = Arc::new(busy_service());
    let result = run(service, 1, vec![doc("a.pdf", 1, 3), doc("b.pdf", 2, 2)]).await;

    let site = result.filter(&RecordFilter::new().classification(Classification::SiteRelated));
    let descriptions: Vec<&str> = site.iter().map(|r| r.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Schacht undicht", "Shaft lighting missing"]);

    let none = result.filter(
        &RecordFilter::new()
            .classification(Classification::SiteRelated)
            .confidence(Confidence::High),
    );
    assert!(none.is_empty());

    let groups = result.group_by_file();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, "a.pdf");
    assert_eq!(groups[0].1.len(), 3);
    assert_eq!(groups[1].1.len(), 4);

    let summary = result.summary();
    assert_eq!(summary.total, 7);
    assert_eq!(summary.site_related, 2);
    assert_eq!(summary.equipment_related, 5);
    assert_eq!(summary.high_confidence, 5);
}

#[tokio::test]
async fn progress_events_arrive_in_canonical_order() {
    let (progress, mut rx) = ChannelProgress::channel();
    let service = Arc::new(busy_service().with_jitter());
    let config = AnalysisConfig::builder()
        .service(service)
        .concurrency(4)
        .retry_backoff_ms(0)
        .progress_callback(progress as ProgressCallback)
        .build()
        .unwrap();

    let docs = vec![
        doc("a.pdf", 1, 3),
        SourceDocument::new("broken.pdf", b"nope".to_vec()),
        doc("b.pdf", 2, 2),
    ];
    DefectPipeline::with_rasterizer(Arc::new(StubRasterizer), &config)
        .unwrap()
        .run(docs)
        .await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push((event.document_index, event.page_index));
    }
    // Page events, then the document event (page_index = page_count).
    assert_eq!(
        seen,
        vec![(1, 1), (1, 2), (1, 3), (1, 3), (2, 0), (3, 1), (3, 2), (3, 2)]
    );
}

#[tokio::test]
async fn blank_document_yields_no_records() {
    let service = Arc::new(ScriptedService::new());
    let result = run(service, 1, vec![doc("blank.pdf", 1, 1)]).await;
    assert!(result.records.is_empty());
    assert_eq!(result.documents[0].status, DocumentStatus::Done { page_count: 1 });
}
