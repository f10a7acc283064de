//! Candidate classification: one text request per candidate.
//!
//! The classifier is infallible from the caller's point of view: every
//! failure becomes [`ClassificationResult::fallback`], so a record always
//! carries a full set of classification fields.

use crate::error::ClassificationError;
use crate::output::{Classification, ClassificationResult, Confidence};
use crate::pipeline::llm::{ServiceClient, ServiceRequest};
use crate::pipeline::response::{decode_embedded, strip_wrappers, value_text, PayloadError};
use crate::prompts::{render_classification_prompt, CLASSIFICATION_SYSTEM_PROMPT};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Reasoning recorded when the service gave none.
pub const NO_REASONING: &str = "Unable to determine";

/// Assigns each candidate an origin, a confidence and an English rendering.
#[derive(Clone)]
pub struct DefectClassifier {
    client: ServiceClient,
    template: String,
    temperature: f32,
    max_tokens: usize,
}

impl DefectClassifier {
    pub fn new(
        client: ServiceClient,
        template: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            client,
            template: template.into(),
            temperature,
            max_tokens,
        }
    }

    /// Classify one candidate. Never fails.
    pub async fn classify(
        &self,
        description: &str,
        code: Option<&str>,
        label: &str,
    ) -> ClassificationResult {
        match self.classify_checked(description, code, label).await {
            Ok(result) => result,
            Err(e) => {
                warn!("{}: classification failed — {}", label, e);
                ClassificationResult::fallback(e)
            }
        }
    }

    async fn classify_checked(
        &self,
        description: &str,
        code: Option<&str>,
        label: &str,
    ) -> Result<ClassificationResult, ClassificationError> {
        let request = ServiceRequest {
            system: Some(CLASSIFICATION_SYSTEM_PROMPT.to_string()),
            prompt: render_classification_prompt(&self.template, description, code),
            image: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let text = self.client.call(&request, label).await?;
        let result = parse_classification(&text)?;
        debug!(
            "{}: {} ({})",
            label, result.classification, result.confidence
        );
        Ok(result)
    }
}

/// Decode a classification response.
///
/// Unknown or missing labels degrade field by field: classification →
/// `Unclassified`, confidence → `Low`, reasoning → [`NO_REASONING`],
/// translation → empty.
pub fn parse_classification(response: &str) -> Result<ClassificationResult, ClassificationError> {
    let cleaned = strip_wrappers(response);
    let obj: Map<String, Value> = decode_embedded(&cleaned, '{').map_err(|e| match e {
        PayloadError::NotFound => ClassificationError::NoPayload,
        PayloadError::Invalid(detail) => ClassificationError::InvalidJson(detail),
    })?;

    let classification = value_text(obj.get("classification"))
        .and_then(|s| Classification::parse_label(&s))
        .unwrap_or(Classification::Unclassified);
    let confidence = value_text(obj.get("confidence"))
        .and_then(|s| Confidence::parse_label(&s))
        .unwrap_or(Confidence::Low);

    Ok(ClassificationResult {
        classification,
        confidence,
        reasoning: value_text(obj.get("reasoning")).unwrap_or_else(|| NO_REASONING.to_string()),
        english_translation: value_text(obj.get("english_translation")).unwrap_or_default(),
    })
}
