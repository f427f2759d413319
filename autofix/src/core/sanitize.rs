//! Extraction of edit payloads from raw model output.
//!
//! Pure transformations: no I/O, no logging. Every failure is recoverable by
//! the caller (retry with a stricter prompt or another model).

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::error::SanitizeError;
use crate::core::types::{EditPayload, FileEdit};

/// Marker the strict prompt asks the model to emit before the payload.
pub const BEGIN_MARKER: &str = "<<<AUTOFIX_BEGIN>>>";
/// Marker the strict prompt asks the model to emit after the payload.
pub const END_MARKER: &str = "<<<AUTOFIX_END>>>";

const EDITS_SCHEMA: &str = include_str!("../../schemas/edits.schema.json");

static DOCUMENT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(EDITS_SCHEMA).expect("edits schema should be json");
    compile(&schema)
});

static RECORD_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(EDITS_SCHEMA).expect("edits schema should be json");
    compile(&schema["properties"]["edits"]["items"])
});

static FENCED_CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A\s*```").expect("fence regex should compile"));

fn compile(schema: &Value) -> Validator {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .expect("edits schema should compile")
}

#[derive(Debug, Deserialize)]
struct EditsDocument {
    edits: Vec<FileEdit>,
}

/// Extract whichever payload shape the response carries.
///
/// Text that opens with `{` (after markers and fences) is tried as a
/// structured edit list first; otherwise a diff header is looked for first.
pub fn parse_payload(raw: &str) -> Result<EditPayload, SanitizeError> {
    if first_payload_char(unwrap_markers(raw)) == Some('{')
        && let Ok(edits) = parse_edits(raw)
    {
        return Ok(EditPayload::FileReplacementSet(edits));
    }
    if let Ok(diff) = extract_diff(raw) {
        return Ok(EditPayload::UnifiedDiff(diff));
    }
    match parse_edits(raw) {
        Ok(edits) => Ok(EditPayload::FileReplacementSet(edits)),
        Err(SanitizeError::NotValidOps(ops)) => Err(SanitizeError::Unrecognized { ops }),
        Err(other) => Err(other),
    }
}

/// Clean unified-diff text out of a response.
///
/// Leading prose is discarded up to the earliest diff header, a closing code
/// fence ends the diff, line endings become `\n`, trailing whitespace is
/// stripped per line and the result ends with exactly one newline.
pub fn extract_diff(raw: &str) -> Result<String, SanitizeError> {
    let text = normalize_newlines(unwrap_markers(raw));
    let lines: Vec<&str> = text.split('\n').collect();
    let start = find_diff_start(&lines).ok_or(SanitizeError::NotADiff)?;

    let mut body: Vec<&str> = Vec::new();
    for line in &lines[start..] {
        if is_fence(line) {
            break;
        }
        body.push(line.trim_end());
    }
    while body.last().is_some_and(|line| !is_diff_line(line)) {
        body.pop();
    }

    let mut out = body.join("\n");
    out.push('\n');
    Ok(out)
}

/// Parse a `{"edits": [...]}` document out of a response.
pub fn parse_edits(raw: &str) -> Result<Vec<FileEdit>, SanitizeError> {
    let text = unwrap_markers(raw);
    let fragment = json_object_fragment(text)
        .ok_or_else(|| SanitizeError::NotValidOps("no JSON object found".to_string()))?;
    let value: Value = serde_json::from_str(fragment)
        .map_err(|err| SanitizeError::NotValidOps(format!("parse json: {err}")))?;

    if let Some(records) = value.get("edits").and_then(Value::as_array) {
        for (index, record) in records.iter().enumerate() {
            if let Some(message) = RECORD_VALIDATOR.iter_errors(record).next() {
                return Err(SanitizeError::NotValidOps(format!(
                    "edit #{index}: {message}"
                )));
            }
        }
    }
    let messages: Vec<String> = DOCUMENT_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(SanitizeError::NotValidOps(messages.join("; ")));
    }

    let document: EditsDocument = serde_json::from_value(value)
        .map_err(|err| SanitizeError::NotValidOps(format!("decode edits: {err}")))?;
    for (index, edit) in document.edits.iter().enumerate() {
        if edit.path.trim().is_empty() {
            return Err(SanitizeError::NotValidOps(format!(
                "edit #{index}: empty path"
            )));
        }
        if FENCED_CONTENT_RE.is_match(&edit.content) {
            return Err(SanitizeError::NotValidOps(format!(
                "edit #{index} ({}): content is wrapped in a code fence",
                edit.path
            )));
        }
    }
    Ok(document.edits)
}

/// Drop everything outside the explicit begin/end markers, when present.
fn unwrap_markers(raw: &str) -> &str {
    let mut text = raw;
    if let Some(idx) = text.find(BEGIN_MARKER) {
        text = &text[idx + BEGIN_MARKER.len()..];
    }
    if let Some(idx) = text.find(END_MARKER) {
        text = &text[..idx];
    }
    text
}

/// Slice from the first `{` to the last `}`.
fn json_object_fragment(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// A fence starts at column 0. Diff lines start with ' ', '+' or '-', so a
/// fence quoted inside a hunk is never one.
fn is_fence(line: &str) -> bool {
    line.starts_with("```")
}

/// Lines that can legitimately end a diff. Blank context lines only count
/// when something diff-shaped follows them.
fn is_diff_line(line: &str) -> bool {
    const HEADER_PREFIXES: [&str; 10] = [
        "diff --git ",
        "index ",
        "--- ",
        "+++ ",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "rename ",
    ];
    if line.is_empty() {
        return false;
    }
    if HEADER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return true;
    }
    matches!(line.as_bytes()[0], b' ' | b'+' | b'-' | b'@' | b'\\')
}

fn find_diff_start(lines: &[&str]) -> Option<usize> {
    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with("diff --git ") {
            return Some(idx);
        }
        if line.starts_with("--- ")
            && lines
                .get(idx + 1)
                .is_some_and(|next| next.starts_with("+++ "))
        {
            return Some(idx);
        }
    }
    None
}

/// First significant character, skipping blank lines and fence lines.
fn first_payload_char(text: &str) -> Option<char> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_fence(line))
        .find_map(|line| line.chars().next())
}
