//! Turning raw model text into structured values.
//!
//! Rules, applied in order:
//! 1. Trim surrounding whitespace.
//! 2. If a fenced block (```` ```json ```` or bare ```` ``` ````) is present, keep
//!    only its body. A leading fence with no closing fence is stripped too.
//! 3. Parse the remainder as JSON.
//! 4. Failing that, parse the outermost `{...}` or `[...]` span.
//!
//! Anything else is [`SpecWeaverError::MalformedOutput`] carrying the head of
//! the raw text. Nothing is ever substituted for a missing value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use specweaver_shared::{Result, SpecWeaverError};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").expect("valid regex"));

/// Parse a model response as JSON.
pub fn unwrap_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SpecWeaverError::malformed("empty response", raw));
    }

    let candidate = fenced_body(trimmed).unwrap_or(trimmed);
    let first_error = match serde_json::from_str(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for span in outer_spans(candidate) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }

    Err(SpecWeaverError::malformed(
        format!("response is not valid JSON: {first_error}"),
        raw,
    ))
}

/// Strip markdown fences from a generated source file.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    fenced_body(trimmed).unwrap_or(trimmed).to_string()
}

fn fenced_body(text: &str) -> Option<&str> {
    if let Some(caps) = FENCE_RE.captures(text) {
        return caps.get(1).map(|m| m.as_str().trim());
    }
    // Truncated output: opening fence but no closing one.
    let rest = text.strip_prefix("```")?;
    Some(rest.split_once('\n').map_or("", |(_, body)| body).trim())
}

/// Outermost `{...}` and `[...]` spans, widest first.
fn outer_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<&str> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| &text[start..=end])
        })
        .collect();
    spans.sort_by_key(|span| std::cmp::Reverse(span.len()));
    spans
}
