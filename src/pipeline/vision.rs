//! Vision endpoint client: sends a page screenshot plus the extraction
//! prompt to a chat-completions endpoint and returns the raw reply.
//!
//! Two endpoint variants share one request/response contract: the standard
//! inference URL (bearer auth) and an enterprise deployment URL (`api-key`
//! header). They are interchangeable behind the `VisionClient` trait.

use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EndpointConfig;
use crate::models::{CaptureArtifact, RawModelResponse};

/// Endpoint failure taxonomy. Transient failures are retried with backoff;
/// fatal failures abort the current institution only.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Transient endpoint failure{}: {message}", fmt_status(.status))]
    Transient { status: Option<u16>, message: String },

    #[error("Fatal endpoint failure (status {status}): {message}")]
    Fatal { status: u16, message: String },
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status {s})"),
        None => String::new(),
    }
}

impl EndpointError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EndpointError::Transient { .. })
    }

    /// Map an HTTP status to the taxonomy: 429 and 5xx retry, everything
    /// else in the 4xx range is a caller error and aborts the institution.
    fn from_status(status: u16, body: String) -> Self {
        if status == 429 || (500..=599).contains(&status) {
            EndpointError::Transient {
                status: Some(status),
                message: body,
            }
        } else {
            EndpointError::Fatal {
                status,
                message: body,
            }
        }
    }
}

/// Anything that can turn a capture artifact into a raw model response.
pub trait VisionClient {
    fn extract(
        &self,
        artifact: &CaptureArtifact,
        prompt: &str,
    ) -> Result<RawModelResponse, EndpointError>;
}

// ──────────────────────────────────────────────
// Wire types (chat-completions contract)
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ──────────────────────────────────────────────
// OpenAiVisionClient
// ──────────────────────────────────────────────

/// Production client over `reqwest::blocking`. The per-call timeout bounds
/// the inference wait; expiry takes the transient path.
pub struct OpenAiVisionClient {
    endpoint: EndpointConfig,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiVisionClient {
    pub fn new(
        endpoint: EndpointConfig,
        api_key: String,
        timeout: Duration,
        max_tokens: u32,
        temperature: f64,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            endpoint,
            api_key,
            client,
            timeout,
            max_tokens,
            temperature,
        }
    }

    fn url(&self) -> &str {
        match &self.endpoint {
            EndpointConfig::Standard { api_url, .. } => api_url,
            EndpointConfig::Azure { api_url, .. } => api_url,
        }
    }

    fn model(&self) -> &str {
        match &self.endpoint {
            EndpointConfig::Standard { model, .. } => model,
            EndpointConfig::Azure { deployment, .. } => deployment,
        }
    }
}

impl VisionClient for OpenAiVisionClient {
    fn extract(
        &self,
        artifact: &CaptureArtifact,
        prompt: &str,
    ) -> Result<RawModelResponse, EndpointError> {
        let _span = tracing::info_span!(
            "vision_extract",
            institution = %artifact.institution,
            page = artifact.page_number,
            image_bytes = artifact.image_png.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let b64 = base64::engine::general_purpose::STANDARD.encode(&artifact.image_png);
        let body = ChatRequest {
            model: self.model(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{b64}"),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let request = self.client.post(self.url()).json(&body);
        let request = match &self.endpoint {
            EndpointConfig::Standard { .. } => request.bearer_auth(&self.api_key),
            EndpointConfig::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                EndpointError::Transient {
                    status: None,
                    message: format!("Request timed out after {}s", self.timeout.as_secs()),
                }
            } else {
                EndpointError::Transient {
                    status: None,
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EndpointError::from_status(status.as_u16(), truncate(&body)));
        }

        let parsed: ChatResponse = response.json().map_err(|e| EndpointError::Transient {
            status: None,
            message: format!("Unparseable response body: {e}"),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::info!(
            elapsed_ms = %start.elapsed().as_millis(),
            content_len = content.len(),
            "Vision extraction call complete"
        );

        Ok(RawModelResponse { content })
    }
}

/// Keep error bodies loggable without dumping a whole HTML error page.
fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut cut = MAX;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &body[..cut])
}

// ──────────────────────────────────────────────
// MockVisionClient (testing)
// ──────────────────────────────────────────────

/// Scripted client: pops one result per call, repeating the last entry once
/// the script is exhausted. Drives the retry tests deterministically.
pub struct MockVisionClient {
    script: Mutex<Vec<Result<String, EndpointError>>>,
    pub calls: Mutex<u32>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self::scripted(vec![Ok(response.to_string())])
    }

    pub fn scripted(script: Vec<Result<String, EndpointError>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl VisionClient for MockVisionClient {
    fn extract(
        &self,
        _artifact: &CaptureArtifact,
        _prompt: &str,
    ) -> Result<RawModelResponse, EndpointError> {
        *self.calls.lock().unwrap() += 1;
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.remove(0)
        } else {
            clone_result(&script[0])
        };
        next.map(|content| RawModelResponse { content })
    }
}

fn clone_result(r: &Result<String, EndpointError>) -> Result<String, EndpointError> {
    match r {
        Ok(s) => Ok(s.clone()),
        Err(EndpointError::Transient { status, message }) => Err(EndpointError::Transient {
            status: *status,
            message: message.clone(),
        }),
        Err(EndpointError::Fatal { status, message }) => Err(EndpointError::Fatal {
            status: *status,
            message: message.clone(),
        }),
    }
}
