//! A ClientWrapper is a wrapper around a text-generation backend.
//! It provides a common interface for the role agents to request completions.
//! It does not keep track of the refinement loop; for that we use an Orchestrator
//! which owns the conversation state and drives the agents through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio::sync::Mutex;

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Sampling knobs forwarded to the backend with every request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Creativity level in `0.0..=1.0`.
    pub temperature: f32,
    /// Nucleus sampling threshold, omitted from the request when `None`.
    pub top_p: Option<f32>,
    /// Upper bound on generated tokens, omitted from the request when `None`.
    pub max_tokens: Option<usize>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
        }
    }
}

/// A single, non-streaming generation request.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// Model identifier understood by the backend (e.g. `"granite3-moe:1b"`).
    pub model: String,
    /// The user-facing prompt text.
    pub prompt: String,
    /// System instruction steering the model's persona.
    pub system: String,
    pub options: SamplingOptions,
}

/// Why a backend call did not yield generated text.
///
/// The `Display` form matches the inline error strings the refinement loop
/// feeds forward when a call fails (`"Error: HTTP 503"`, `"Error: <detail>"`).
///
/// ```
/// use reflectllm::client_wrapper::BackendError;
///
/// assert_eq!(BackendError::Status(503).to_string(), "Error: HTTP 503");
/// assert_eq!(
///     BackendError::Unreachable("connection refused".into()).to_string(),
///     "Error: connection refused"
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// Connection failure or timeout before a response arrived.
    Unreachable(String),
    /// The backend answered with a non-success HTTP status.
    Status(u16),
    /// The response body could not be decoded.
    MalformedPayload(String),
}

impl BackendError {
    /// Short machine-friendly label for the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) => "unreachable",
            BackendError::Status(_) => "status",
            BackendError::MalformedPayload(_) => "malformed_payload",
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unreachable(detail) => write!(f, "Error: {}", detail),
            BackendError::Status(code) => write!(f, "Error: HTTP {}", code),
            BackendError::MalformedPayload(detail) => write!(f, "Error: {}", detail),
        }
    }
}

impl Error for BackendError {}

/// Trait defining the interface to a text-generation backend.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send one request and return the trimmed generated text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;

    /// Whether the backend answers at all. Fail-soft: any error yields `false`.
    /// Backends without a health surface are assumed reachable.
    async fn is_reachable(&self) -> bool {
        true
    }

    /// Whether a model whose name contains `model` is available. Fail-soft.
    async fn has_model(&self, _model: &str) -> bool {
        true
    }

    /// Human-readable backend name used in log lines.
    fn backend_name(&self) -> &str {
        "backend"
    }

    /// Hook to retrieve usage from the *last* generate() call.
    /// Default impl returns None so existing wrappers don't break.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        match self.usage_slot() {
            Some(slot) => slot.lock().await.clone(),
            None => None,
        }
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // ClientWrapper implementations supporting TokenUsage tracking should return a Mutex<Option<TokenUsage>> by overriding this method.
        None
    }
}
