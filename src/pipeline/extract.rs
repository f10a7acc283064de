//! Page extraction: one vision request per page → defect candidates.
//!
//! The extractor never fails the page. Anything that goes wrong (encoding,
//! service error, timeout, unusable response) is logged and degrades to an
//! empty candidate list; [`DefectExtractor::extract_checked`] exposes the
//! reason so the orchestrator can record the page as degraded.

use crate::error::ExtractionParseError;
use crate::output::RawDefectCandidate;
use crate::pipeline::encode::encode_page;
use crate::pipeline::llm::{ServiceClient, ServiceRequest};
use crate::pipeline::render::RasterImage;
use crate::pipeline::response::{
    decode_embedded_preferring, strip_wrappers, value_text, verbatim_text, PayloadError,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Reads defect entries off rendered pages.
#[derive(Clone)]
pub struct DefectExtractor {
    client: ServiceClient,
    prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl DefectExtractor {
    pub fn new(
        client: ServiceClient,
        prompt: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            client,
            prompt: prompt.into(),
            temperature,
            max_tokens,
        }
    }

    /// Extract candidates from one page, degrading to `[]` on any failure.
    pub async fn extract(&self, page: &RasterImage, label: &str) -> Vec<RawDefectCandidate> {
        match self.extract_checked(page, label).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("{}: extraction degraded to no candidates — {}", label, e);
                Vec::new()
            }
        }
    }

    /// Extract candidates from one page, reporting why a page degraded.
    pub async fn extract_checked(
        &self,
        page: &RasterImage,
        label: &str,
    ) -> Result<Vec<RawDefectCandidate>, ExtractionParseError> {
        let image = encode_page(page).map_err(|e| ExtractionParseError::Encode(e.to_string()))?;

        let request = ServiceRequest {
            system: None,
            prompt: self.prompt.clone(),
            image: Some(image),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let text = self.client.call(&request, label).await?;
        let candidates = parse_candidates(&text)?;
        debug!("{}: {} candidates", label, candidates.len());
        Ok(candidates)
    }
}

/// Decode an extraction response into candidates, preserving array order.
pub fn parse_candidates(response: &str) -> Result<Vec<RawDefectCandidate>, ExtractionParseError> {
    let cleaned = strip_wrappers(response);
    let items: Vec<Value> =
        decode_embedded_preferring(&cleaned, '[', |items: &Vec<Value>| {
            items.iter().any(Value::is_object)
        })
        .map_err(|e| match e {
            PayloadError::NotFound => ExtractionParseError::NoPayload,
            PayloadError::Invalid(detail) => ExtractionParseError::InvalidJson(detail),
        })?;

    Ok(items.iter().filter_map(candidate_from_value).collect())
}

/// Non-object elements are skipped. The description is kept verbatim; a
/// missing one becomes an empty string, which the orchestrator drops before
/// classifying.
fn candidate_from_value(value: &Value) -> Option<RawDefectCandidate> {
    let obj = value.as_object()?;
    Some(RawDefectCandidate {
        number: value_text(obj.get("number")),
        code: value_text(obj.get("code")),
        description: verbatim_text(obj.get("description")).unwrap_or_default(),
        severity: value_text(obj.get("severity")),
    })
}
