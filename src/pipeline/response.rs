//! Two-stage decoding of structured payloads embedded in model output.
//!
//! Even when told to "return ONLY valid JSON", models regularly wrap the
//! payload in ```` ```json ```` fences, prefix it with a sentence, append a
//! remark, or sprinkle zero-width characters into it. Decoding therefore
//! runs in two stages:
//!
//! 1. [`strip_wrappers`] — deterministic cleanup of known wrapping
//!    artefacts (fences, CRLF, invisible Unicode).
//! 2. [`decode_embedded`] — scan for the first position where a JSON value
//!    of the expected shape decodes, ignoring any text around it.
//!    [`decode_embedded_preferring`] keeps scanning past values the caller
//!    considers stray.
//!
//! Neither stage raises on bad content: the outcome is a [`PayloadError`]
//! value the extractor and classifier turn into their fallback results.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Why no payload could be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The opening delimiter never occurs in the text.
    NotFound,
    /// Delimiters were found but nothing decoded; carries the first decode error.
    Invalid(String),
}

// ── Stage 1: strip wrappers ──────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").unwrap());

/// Remove code fences, normalise line endings and drop invisible characters.
pub fn strip_wrappers(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    );
    RE_FENCE.replace_all(&s, "").trim().to_string()
}

// ── Stage 2: locate and decode ───────────────────────────────────────────

/// Decode the first `T` that starts at an `open` delimiter in `text`.
///
/// Each occurrence of `open` is tried in turn; trailing text after a
/// complete value is ignored.
pub fn decode_embedded<T: DeserializeOwned>(text: &str, open: char) -> Result<T, PayloadError> {
    decode_embedded_preferring(text, open, |_: &T| true)
}

/// Like [`decode_embedded`], but keeps scanning past values that decode
/// without satisfying `preferred`.
///
/// A stray bracket such as "Page [2]" before the payload decodes as a valid
/// array; the caller's predicate lets the real payload after it win. When
/// no decoded value is preferred, the first one decoded is returned.
pub fn decode_embedded_preferring<T, F>(
    text: &str,
    open: char,
    preferred: F,
) -> Result<T, PayloadError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut first_value: Option<T> = None;
    let mut first_err: Option<String> = None;

    for (pos, _) in text.match_indices(open) {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) if preferred(&value) => return Ok(value),
            Some(Ok(value)) => {
                if first_value.is_none() {
                    first_value = Some(value);
                }
            }
            Some(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e.to_string());
                }
            }
            None => {}
        }
    }

    if let Some(value) = first_value {
        return Ok(value);
    }
    match first_err {
        Some(e) => Err(PayloadError::Invalid(e)),
        None => Err(PayloadError::NotFound),
    }
}

/// Read a loosely-typed field as optional text.
///
/// `null`, empty strings and placeholder strings ("null", "none", "n/a",
/// "-") are absent. Numbers and booleans are rendered as text so
/// `"number": 3` and `"number": "3"` read the same.
pub fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let t = s.trim();
            let placeholder = ["null", "none", "n/a", "-"]
                .iter()
                .any(|p| t.eq_ignore_ascii_case(p));
            if t.is_empty() || placeholder {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Read a field whose text must be kept verbatim.
///
/// Only `null`, a missing field and the literal string "null" are absent;
/// any other string is returned untouched, surrounding whitespace included.
pub fn verbatim_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if s.trim().eq_ignore_ascii_case("null") => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
