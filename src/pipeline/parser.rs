//! Tolerant parsing of the vision model's reply into typed records.
//!
//! Layered fallback chain, tried in order:
//! 1. strict decode — a `{"profiles": [...]}` envelope or a bare array
//! 2. a fenced ```json block embedded in prose
//! 3. the first balanced `[...]` substring anywhere in the text
//! 4. give up: empty sequence plus one `ParseWarning`
//!
//! Parsing never raises past this boundary. One bad page cannot abort the
//! run; `searched_institution` and `page_found` are always injected from
//! pipeline context, never trusted from the model.

use serde_json::Value;

use crate::models::{sanitize_field, ProfileRecord, RawModelResponse};

/// Non-fatal parse problem, recorded in the run summary.
#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub institution: String,
    pub page: u32,
    pub detail: String,
}

/// What one page's response parsed into.
#[derive(Debug, Default)]
pub struct Parsed {
    pub records: Vec<ProfileRecord>,
    pub warning: Option<ParseWarning>,
}

pub fn parse_profiles(response: &RawModelResponse, institution: &str, page: u32) -> Parsed {
    // A genuinely blank reply means the model saw no profiles. Not an error.
    if response.is_blank() {
        return Parsed::default();
    }
    let text = response.content.trim();

    let array = strict_array(text)
        .or_else(|| fenced_array(text))
        .or_else(|| embedded_array(text));

    let Some(array) = array else {
        let detail = format!("No JSON array recoverable from response: {}", snippet(text));
        tracing::warn!(institution, page, detail = %detail, "Parse warning");
        return Parsed {
            records: Vec::new(),
            warning: Some(ParseWarning {
                institution: institution.to_string(),
                page,
                detail,
            }),
        };
    };

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for item in &array {
        match coerce_record(item, institution, page) {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(institution, page, dropped, "Dropped nameless profile objects");
    }

    Parsed {
        records,
        warning: None,
    }
}

/// Shape (a): the whole response is JSON — either the requested
/// `{"profiles": [...]}` envelope or a bare array.
fn strict_array(text: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    array_of(value)
}

fn array_of(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("profiles") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Shape (b): JSON inside a markdown fence, with prose around it.
fn fenced_array(text: &str) -> Option<Vec<Value>> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    strict_array(after[..end].trim())
}

/// Shape (c): the first balanced `[...]` substring, string-literal aware.
fn embedded_array(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return strict_array(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// One model-reported object → one record, or `None` when the name is
/// missing or empty. Accepts the loose field aliases the model is known to
/// answer with.
fn coerce_record(value: &Value, institution: &str, page: u32) -> Option<ProfileRecord> {
    let name = field(value, &["name", "full_name"])?;
    let mut record = ProfileRecord::new(&name, institution, page)?;
    record.job_title = field(value, &["job_title", "title"]);
    record.company = field(value, &["company", "organization"]);
    record.location = field(value, &["location"]);
    record.education = field(value, &["education"]);
    record.connections = field(value, &["connections"]);
    Some(record)
}

fn field(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            let clean = sanitize_field(s);
            if !clean.is_empty() {
                return Some(clean);
            }
        }
    }
    None
}

fn snippet(text: &str) -> String {
    const MAX: usize = 120;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut cut = MAX;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
