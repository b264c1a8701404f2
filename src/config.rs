//! Run configuration: institutions, endpoint selection, retry/backoff
//! numbers, and output paths.
//!
//! Loaded from a JSON document; every field has a serde default so a partial
//! file (or none at all) still yields a usable configuration. API keys are
//! read from the environment only — they never appear in the file, the logs,
//! or the checkpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_NAME: &str = "alumniscope";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default log filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{APP_NAME}=info")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Missing API key: set {0} in the environment")]
    MissingApiKey(&'static str),

    #[error("No institutions configured")]
    NoInstitutions,
}

/// Which inference endpoint variant to call.
///
/// Both variants speak the same chat-completions request/response contract;
/// they differ only in URL shape and auth header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Standard inference endpoint; `Authorization: Bearer <key>`.
    Standard {
        #[serde(default = "default_api_url")]
        api_url: String,
        #[serde(default = "default_model")]
        model: String,
    },
    /// Enterprise/managed deployment; `api-key: <key>` header and a
    /// deployment-scoped URL.
    Azure {
        /// Full deployment URL including the api-version query parameter.
        api_url: String,
        deployment: String,
    },
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig::Standard {
            api_url: default_api_url(),
            model: default_model(),
        }
    }
}

impl EndpointConfig {
    /// Environment variable holding the credential for this variant.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            EndpointConfig::Standard { .. } => "OPENAI_API_KEY",
            EndpointConfig::Azure { .. } => "AZURE_OPENAI_API_KEY",
        }
    }
}

/// Exponential backoff parameters for transient endpoint failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts per call (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Multiplicative jitter fraction in `[0, 1]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    4
}
fn default_jitter() -> f64 {
    0.25
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Search queries, one per educational institution.
    #[serde(default = "default_institutions")]
    pub institutions: Vec<String>,

    /// Pagination bound per institution.
    #[serde(default = "default_max_pages")]
    pub max_pages_per_institution: u32,

    /// Stop paginating an institution after this many consecutive pages
    /// with zero new records.
    #[serde(default = "default_stall_page_limit")]
    pub stall_page_limit: u32,

    /// Capture attempts per page before the page is skipped.
    #[serde(default = "default_capture_retry_limit")]
    pub capture_retry_limit: u32,

    #[serde(default)]
    pub backoff: BackoffSettings,

    /// Per-call timeout for the vision endpoint, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Token cap sent with every extraction request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; extraction wants determinism.
    #[serde(default)]
    pub temperature: f64,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Durable dataset document, rewritten atomically at each checkpoint.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Root of the rendered-page screenshot tree consumed by `DirSession`.
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
}

fn default_institutions() -> Vec<String> {
    [
        "National Defense University",
        "Industrial College of the Armed Forces",
        "Eisenhower School for National Security and Resource Strategy",
        "Information Resources Management College",
        "Joint Forces Staff College",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_pages() -> u32 {
    5
}
fn default_stall_page_limit() -> u32 {
    2
}
fn default_capture_retry_limit() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    1_000
}
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("output/extracted_profiles.json")
}
fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

impl Default for RunConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; deserializing `{}` is the
        // canonical way to build the default.
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.institutions.is_empty() {
            return Err(ConfigError::NoInstitutions);
        }
        Ok(())
    }

    /// Read the endpoint credential from the environment. The value is
    /// treated as opaque and is never logged.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        let var = self.endpoint.api_key_var();
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(var)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
