//! Result types: candidates, classified records and the batch result.
//!
//! [`BatchResult`] is the only thing the pipeline hands back. It is an
//! ordinary value: presentation and export code receive it (or a slice of
//! its records) by reference and never share mutable state with the
//! pipeline.

use crate::error::DocumentOpenError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Candidates ───────────────────────────────────────────────────────────

/// A defect entry as read off one page, before classification.
///
/// Text is kept in the report's original language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDefectCandidate {
    /// Reference number printed next to the entry ("1", "A1", "3.2").
    pub number: Option<String>,
    /// Defect category code ("704").
    pub code: Option<String>,
    /// Full description, verbatim.
    pub description: String,
    /// Severity term as printed ("geringfügig", "major").
    pub severity: Option<String>,
}

impl RawDefectCandidate {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            number: None,
            code: None,
            description: description.into(),
            severity: None,
        }
    }

    /// Candidates without a description never reach the classifier.
    pub fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// Where a defect originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Building or structural installation (shaft, pit, machine room, power supply).
    SiteRelated,
    /// The lift equipment itself or its documentation.
    EquipmentRelated,
    /// The service answered but gave no usable label.
    Unclassified,
    /// The classification request failed.
    ClassificationError,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::SiteRelated,
        Classification::EquipmentRelated,
        Classification::Unclassified,
        Classification::ClassificationError,
    ];

    /// Human-readable label used in tables and spreadsheets.
    pub fn label(&self) -> &'static str {
        match self {
            Classification::SiteRelated => "Site-related",
            Classification::EquipmentRelated => "Equipment-related",
            Classification::Unclassified => "Unclassified",
            Classification::ClassificationError => "Classification error",
        }
    }

    /// Interpret a label produced by the reasoning service.
    ///
    /// Accepts the canonical variant names, spelled-out English forms
    /// (including negated ones such as "non-site-related") and the German
    /// terms used in older reports. The whole label must match; a trailing
    /// "defect" / "Mangel" is ignored. Returns `None` for anything else.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        let stem = norm
            .strip_suffix("defect")
            .or_else(|| norm.strip_suffix("mangel"))
            .unwrap_or(norm.as_str());
        match stem {
            "siterelated" | "site" | "bauseitig" | "bauseitiger" | "bauseitige" => {
                Some(Classification::SiteRelated)
            }
            "equipmentrelated" | "equipment" | "liftrelated" | "nonsiterelated"
            | "notsiterelated" | "nichtbauseitig" | "nichtbauseitiger" | "nichtbauseitige" => {
                Some(Classification::EquipmentRelated)
            }
            "unclassified" => Some(Classification::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How sure the service was about a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const ALL: [Confidence; 3] = [Confidence::High, Confidence::Medium, Confidence::Low];

    pub fn label(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }

    /// Case-insensitive parse of "high" / "medium" / "low".
    pub fn parse_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "high" | "hoch" => Some(Confidence::High),
            "medium" | "mittel" => Some(Confidence::Medium),
            "low" | "niedrig" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of one classification call. Always fully populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub confidence: Confidence,
    pub reasoning: String,
    pub english_translation: String,
}

impl ClassificationResult {
    /// The result used when classification failed.
    pub fn fallback(error: impl fmt::Display) -> Self {
        Self {
            classification: Classification::ClassificationError,
            confidence: Confidence::Low,
            reasoning: format!("Error: {error}"),
            english_translation: String::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.classification == Classification::ClassificationError
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// Where a record came from in the input batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_filename: String,
    /// 1-indexed physical page number.
    pub page_number: usize,
    /// 0-indexed position in the extractor's output for that page.
    pub extraction_order: usize,
}

/// A classified defect with full provenance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedDefectRecord {
    pub number: Option<String>,
    pub code: Option<String>,
    pub description: String,
    pub severity: Option<String>,
    pub classification: Classification,
    pub confidence: Confidence,
    pub reasoning: String,
    pub english_translation: String,
    pub provenance: Provenance,
}

impl ClassifiedDefectRecord {
    pub fn new(
        candidate: RawDefectCandidate,
        result: ClassificationResult,
        provenance: Provenance,
    ) -> Self {
        Self {
            number: candidate.number,
            code: candidate.code,
            description: candidate.description,
            severity: candidate.severity,
            classification: result.classification,
            confidence: result.confidence,
            reasoning: result.reasoning,
            english_translation: result.english_translation,
            provenance,
        }
    }

    pub fn file(&self) -> &str {
        &self.provenance.source_filename
    }

    pub fn page(&self) -> usize {
        self.provenance.page_number
    }

    /// Flatten into the export row shape.
    pub fn to_flat(&self) -> FlatRecord {
        FlatRecord {
            file: self.provenance.source_filename.clone(),
            page: self.provenance.page_number,
            number: self.number.clone().unwrap_or_default(),
            code: self.code.clone().unwrap_or_default(),
            description: self.description.clone(),
            english_translation: self.english_translation.clone(),
            severity: self.severity.clone().unwrap_or_default(),
            classification: self.classification,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
        }
    }
}

/// One row of the export table. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub file: String,
    pub page: usize,
    pub number: String,
    pub code: String,
    pub description: String,
    pub english_translation: String,
    pub severity: String,
    pub classification: Classification,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl FlatRecord {
    /// Column headers in export order.
    pub const COLUMNS: [&'static str; 10] = [
        "file",
        "page",
        "number",
        "code",
        "description",
        "english_translation",
        "severity",
        "classification",
        "confidence",
        "reasoning",
    ];
}

// ── Per-document reporting ───────────────────────────────────────────────

/// Terminal state of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// Every page was extracted and every surviving candidate classified.
    Done { page_count: usize },
    /// The document could not be opened; it contributed no records.
    Failed { error: DocumentOpenError },
}

/// What happened to one input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub filename: String,
    pub status: DocumentStatus,
    /// Records contributed to the batch.
    pub record_count: usize,
    /// 1-indexed pages whose extraction response could not be used.
    pub degraded_pages: Vec<usize>,
    /// Candidates dropped because their description was empty.
    pub dropped_candidates: usize,
    /// Candidates whose classification fell back to `ClassificationError`.
    pub classification_failures: usize,
}

impl DocumentReport {
    pub fn failed(filename: impl Into<String>, error: DocumentOpenError) -> Self {
        Self {
            filename: filename.into(),
            status: DocumentStatus::Failed { error },
            record_count: 0,
            degraded_pages: Vec::new(),
            dropped_candidates: 0,
            classification_failures: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DocumentStatus::Failed { .. })
    }
}

/// Aggregate counters for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub failed_documents: usize,
    pub total_pages: usize,
    pub degraded_pages: usize,
    pub total_records: usize,
    pub classification_failures: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
}

// ── Batch result ─────────────────────────────────────────────────────────

/// Everything one pipeline run produced, in canonical order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    /// Documents in input order → pages ascending → extraction order.
    pub records: Vec<ClassifiedDefectRecord>,
    /// One entry per input document, in input order.
    pub documents: Vec<DocumentReport>,
    pub stats: BatchStats,
}

/// Selects records by classification and confidence.
///
/// An empty set on either axis means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub classifications: Vec<Classification>,
    pub confidences: Vec<Confidence>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classification(mut self, c: Classification) -> Self {
        if !self.classifications.contains(&c) {
            self.classifications.push(c);
        }
        self
    }

    pub fn confidence(mut self, c: Confidence) -> Self {
        if !self.confidences.contains(&c) {
            self.confidences.push(c);
        }
        self
    }

    pub fn matches(&self, record: &ClassifiedDefectRecord) -> bool {
        (self.classifications.is_empty() || self.classifications.contains(&record.classification))
            && (self.confidences.is_empty() || self.confidences.contains(&record.confidence))
    }
}

/// Headline counts shown above the result table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub site_related: usize,
    pub equipment_related: usize,
    pub unclassified: usize,
    pub classification_errors: usize,
    pub high_confidence: usize,
}

impl ResultSummary {
    pub fn from_records(records: &[ClassifiedDefectRecord]) -> Self {
        let mut s = ResultSummary {
            total: records.len(),
            ..Default::default()
        };
        for r in records {
            match r.classification {
                Classification::SiteRelated => s.site_related += 1,
                Classification::EquipmentRelated => s.equipment_related += 1,
                Classification::Unclassified => s.unclassified += 1,
                Classification::ClassificationError => s.classification_errors += 1,
            }
            if r.confidence == Confidence::High {
                s.high_confidence += 1;
            }
        }
        s
    }

    /// `count` as a percentage of the total, 0.0 for an empty result.
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }
}

impl BatchResult {
    /// Records matching `filter`, in original relative order.
    pub fn filter(&self, filter: &RecordFilter) -> Vec<&ClassifiedDefectRecord> {
        self.records.iter().filter(|r| filter.matches(r)).collect()
    }

    /// Records grouped by source file, files in first-appearance order.
    pub fn group_by_file(&self) -> Vec<(&str, Vec<&ClassifiedDefectRecord>)> {
        group_by_file(self.records.iter())
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary::from_records(&self.records)
    }

    /// Reports of documents that could not be opened.
    pub fn failed_documents(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents.iter().filter(|d| d.is_failed())
    }
}

/// Group any record sequence by file, keeping first-appearance order of
/// files and relative order of records within each file.
pub fn group_by_file<'a>(
    records: impl IntoIterator<Item = &'a ClassifiedDefectRecord>,
) -> Vec<(&'a str, Vec<&'a ClassifiedDefectRecord>)> {
    let mut groups: Vec<(&'a str, Vec<&'a ClassifiedDefectRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(f, _)| *f == record.file()) {
            Some((_, list)) => list.push(record),
            None => groups.push((record.file(), vec![record])),
        }
    }
    groups
}
