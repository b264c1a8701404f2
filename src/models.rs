//! Core data types for the capture-and-extraction pipeline.
//!
//! `ProfileRecord` is the durable unit: one extracted alumni entry, immutable
//! once stored. `CaptureArtifact` and `RawModelResponse` are transient and
//! live for a single pipeline iteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted free-text fields are capped at this many characters.
/// The model's output is untrusted and has no inherent length bound.
pub const MAX_FIELD_LEN: usize = 300;

/// One extracted alumni entry, as seen by the vision model on a result page.
///
/// `searched_institution` and `page_found` are always injected from pipeline
/// context — the model does not know them authoritatively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<String>,
    pub searched_institution: String,
    pub page_found: u32,
}

impl ProfileRecord {
    /// Build a record from sanitized parts. Returns `None` when the name is
    /// empty after trimming — such objects are discarded, never stored.
    pub fn new(
        name: &str,
        institution: &str,
        page_found: u32,
    ) -> Option<Self> {
        let name = sanitize_field(name);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            job_title: None,
            company: None,
            location: None,
            education: None,
            connections: None,
            searched_institution: institution.to_string(),
            page_found,
        })
    }

    /// Dedup key: normalized-lowercase `(name, searched_institution)`.
    /// The same person found via two institutions is two distinct records.
    pub fn identity_key(&self) -> (String, String) {
        (
            normalize(&self.name),
            normalize(&self.searched_institution),
        )
    }
}

/// Lowercase + whitespace-collapsed form used for identity comparison.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Sanitize a model-reported text field before it is persisted:
/// strip control characters, collapse runs of whitespace, cap the length.
pub fn sanitize_field(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.len() <= MAX_FIELD_LEN {
        return cleaned;
    }
    let mut cut = MAX_FIELD_LEN;
    while !cleaned.is_char_boundary(cut) {
        cut -= 1;
    }
    cleaned[..cut].to_string()
}

/// Image snapshot of one rendered result page. Produced and consumed within
/// a single pipeline iteration; never persisted.
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    pub image_png: Vec<u8>,
    pub institution: String,
    pub page_number: u32,
    pub captured_at: DateTime<Utc>,
}

/// Raw textual payload returned by the vision endpoint for one artifact.
#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub content: String,
}

impl RawModelResponse {
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}
