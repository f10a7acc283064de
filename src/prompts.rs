//! Instruction texts for the two reasoning passes.
//!
//! Every prompt lives here so a wording change touches one file and tests
//! can check the contract clauses without a live model. Callers can replace
//! either prompt through [`crate::config::AnalysisConfig`]; the constants are
//! used when no override is set.

/// Instructions sent with every page image.
///
/// The response contract (JSON array, `null` for missing fields, `[]` for a
/// page without defects) is what [`crate::pipeline::extract`] parses.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are analysing one page of an elevator/lift inspection report. The report may come from ANY inspection body (TÜV, DEKRA, or others) and may be written in ANY language.

Identify and extract ALL defects, deficiencies, issues or findings shown on this page.

Defects can appear anywhere:
- Sections titled "Mängelliste", "Defects", "Findings", "Issues", "Remarks" or similar
- Tables or lists of problems
- Numbered or bulleted items describing a problem
- Free-text paragraphs

For EACH defect extract:
1. "number": the reference number or identifier printed with it, else null
2. "code": the defect code or category number, else null
3. "description": the complete description of the defect
4. "severity": the severity or rating term as printed ("minor", "major", "geringfügig", "erheblich", …), else null

Return ONLY a JSON array, one object per defect:
[
  {"number": "1", "code": "704", "description": "Der Antrieb verliert Öl", "severity": "geringfügig"},
  {"number": null, "code": null, "description": "Circuit diagram not available at facility", "severity": null}
]

RULES:
- Keep every text in its ORIGINAL language. Do NOT translate.
- Use null for missing fields. Do not omit keys.
- If the page contains no defects, return []
- Return ONLY valid JSON: no commentary, no Markdown."#;

/// System message for the classification pass.
pub const CLASSIFICATION_SYSTEM_PROMPT: &str =
    "You are an expert in elevator safety inspections. Classify defects by their nature.";

/// Instructions for the classification pass.
///
/// `{defect}` is replaced by [`classification_context`].
pub const DEFAULT_CLASSIFICATION_PROMPT: &str = r#"You are classifying one defect from an elevator/lift inspection report.

{defect}

Classify the defect as exactly one of:
- "SiteRelated": caused by the building or structure (shaft, pit, machine room, building power supply, access, lighting, ventilation provided by the building owner)
- "EquipmentRelated": concerns the lift equipment itself or its documentation (drive, brakes, doors, safety gear, controller, certificates, logbooks, circuit diagrams)

Use your judgement about where the defect originates. Also translate the defect description into English, whatever its original language.

Return ONLY this JSON object:
{
  "classification": "SiteRelated" or "EquipmentRelated",
  "confidence": "High" or "Medium" or "Low",
  "reasoning": "brief explanation of the classification",
  "english_translation": "English translation of the description"
}"#;

/// Describe one candidate for the classification prompt.
pub fn classification_context(description: &str, code: Option<&str>) -> String {
    let mut ctx = format!("Defect description: {description}");
    if let Some(code) = code.filter(|c| !c.trim().is_empty()) {
        ctx.push_str(&format!("\nDefect code: {code}"));
    }
    ctx
}

/// Render the classification instructions for one candidate.
///
/// A custom template without a `{defect}` placeholder gets the context
/// appended instead.
pub fn render_classification_prompt(
    template: &str,
    description: &str,
    code: Option<&str>,
) -> String {
    let ctx = classification_context(description, code);
    if template.contains("{defect}") {
        template.replace("{defect}", &ctx)
    } else {
        format!("{template}\n\n{ctx}")
    }
}
