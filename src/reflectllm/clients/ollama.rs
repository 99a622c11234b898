//! Ollama client wrapper speaking the native `/api/generate` and `/api/tags` endpoints.
//!
//! The client is constructed once and shared as `Arc<dyn ClientWrapper>` between the
//! generator and critic agents. Each request is a single non-streaming attempt bounded
//! by the configured timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use reflectllm::client_wrapper::{ClientWrapper, GenerationRequest, SamplingOptions};
//! use reflectllm::clients::ollama::OllamaClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = OllamaClient::new_with_base_url("http://localhost:11434");
//!     if !client.is_reachable().await {
//!         eprintln!("start the server with `ollama serve`");
//!         return;
//!     }
//!
//!     let reply = client
//!         .generate(&GenerationRequest {
//!             model: "granite3-moe:1b".into(),
//!             prompt: "Name three prime numbers.".into(),
//!             system: "You are terse.".into(),
//!             options: SamplingOptions::default(),
//!         })
//!         .await;
//!
//!     match reply {
//!         Ok(text) => println!("{}", text),
//!         Err(err) => eprintln!("{}", err),
//!     }
//! }
//! ```

use crate::client_wrapper::{
    BackendError, ClientWrapper, GenerationRequest, TokenUsage,
};
use crate::config::ReflectionConfig;
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

/// Address of a locally running `ollama serve`.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Model pulled by default for both roles.
pub const DEFAULT_MODEL: &str = "granite3-moe:1b";

/// Bound on a single generation round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The reachability probe gives up much sooner than generation does.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

#[derive(Deserialize)]
struct ModelDescriptor {
    #[serde(default)]
    name: String,
}

/// Client for a single Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OllamaClient {
    /// Create a client for `base_url` with the default 120 second request timeout.
    pub fn new_with_base_url(base_url: &str) -> Self {
        Self::new_with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client for `base_url` whose generation requests give up after `timeout`.
    /// A zero `timeout` would fail every request, so it selects the default instead.
    pub fn new_with_timeout(base_url: &str, timeout: Duration) -> Self {
        OllamaClient {
            http: create_http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: if timeout.is_zero() {
                DEFAULT_REQUEST_TIMEOUT
            } else {
                timeout
            },
            token_usage: Mutex::new(None),
        }
    }

    /// Build the client from the endpoint and timeout carried by `config`.
    pub fn from_config(config: &ReflectionConfig) -> Self {
        Self::new_with_timeout(&config.base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Names of every model the server currently has available.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .http
            .get(self.endpoint("api/tags"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| BackendError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let tags: TagsReply = response
            .json()
            .await
            .map_err(|err| BackendError::MalformedPayload(err.to_string()))?;

        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL)
    }
}

/// Build the underlying reqwest client with keep-alive connection reuse.
///
/// Timeouts are applied per request, so a builder failure can fall back to a
/// plain client without losing the request bound.
fn create_http_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            error!(
                "reflectllm::clients::ollama::create_http_client(): falling back to default client: {}",
                err
            );
            reqwest::Client::new()
        })
}

#[async_trait]
impl ClientWrapper for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        *self.token_usage.lock().await = None;

        let payload = GeneratePayload {
            model: &request.model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            options: GenerateOptions {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_predict: request.options.max_tokens,
            },
        };

        debug!(
            "OllamaClient::generate model={} prompt_len={}",
            request.model,
            request.prompt.len()
        );

        let response = self
            .http
            .post(self.endpoint("api/generate"))
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                error!("OllamaClient::generate transport error: {}", err);
                BackendError::Unreachable(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("OllamaClient::generate HTTP {}", status.as_u16());
            return Err(BackendError::Status(status.as_u16()));
        }

        let reply: GenerateReply = response.json().await.map_err(|err| {
            error!("OllamaClient::generate undecodable body: {}", err);
            BackendError::MalformedPayload(err.to_string())
        })?;

        if reply.prompt_eval_count.is_some() || reply.eval_count.is_some() {
            let input_tokens = reply.prompt_eval_count.unwrap_or(0);
            let output_tokens = reply.eval_count.unwrap_or(0);
            *self.token_usage.lock().await = Some(TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            });
        }

        Ok(reply.response.trim().to_string())
    }

    async fn is_reachable(&self) -> bool {
        match self
            .http
            .get(self.endpoint("api/tags"))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("OllamaClient::is_reachable: {}", err);
                false
            }
        }
    }

    async fn has_model(&self, model: &str) -> bool {
        match self.list_models().await {
            Ok(names) => names.iter().any(|name| name.contains(model)),
            Err(err) => {
                debug!("OllamaClient::has_model({}): {}", model, err);
                false
            }
        }
    }

    fn backend_name(&self) -> &str {
        "ollama"
    }

    /// This function is used to get the token usage for the last request, otherwise there will be no tracking for token usage available
    /// because default trait implementation of `usage_slot()` returns `None`
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_dropped_from_base_url() {
        let client = OllamaClient::new_with_base_url("http://localhost:11434/");
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(
            client.endpoint("api/generate"),
            "http://localhost:11434/api/generate"
        );
    }

    #[test]
    fn test_default_timeout_is_two_minutes() {
        let client = OllamaClient::default();
        assert_eq!(client.request_timeout(), Duration::from_secs(120));
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_timeout_comes_from_config() {
        let config = ReflectionConfig::default().with_request_timeout(Duration::from_millis(500));
        let client = OllamaClient::from_config(&config);
        assert_eq!(client.request_timeout(), Duration::from_millis(500));

        let client = OllamaClient::new_with_timeout(DEFAULT_BASE_URL, Duration::ZERO);
        assert_eq!(client.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_payload_omits_unset_options() {
        let payload = GeneratePayload {
            model: "m",
            prompt: "p",
            system: "s",
            stream: false,
            options: GenerateOptions {
                temperature: 0.5,
                top_p: None,
                num_predict: None,
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["stream"], serde_json::json!(false));
        assert_eq!(value["options"], serde_json::json!({"temperature": 0.5}));
    }
}
