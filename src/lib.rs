//! # reflectllm
//!
//! reflectllm runs a two-role refinement loop against a local text-generation backend: a
//! **generator** answers a query, a **critic** reviews the answer, and the generator revises
//! against the feedback until the critic signals convergence or the iteration budget is spent.
//!
//! The crate provides small, layered abstractions for:
//!
//! * **Backend access**: the [`ClientWrapper`] trait and its Ollama implementation
//!   [`clients::ollama::OllamaClient`], including fail-soft health checks
//! * **Role agents**: [`RoleAgent`] binds a [`Role`] and its [`RoleConfig`] to a client and
//!   counts its invocations
//! * **Orchestration**: [`Orchestrator`] owns the iteration state machine, convergence
//!   detection, and history accounting
//! * **Configuration**: [`ReflectionConfig`] enumerates every recognised option, with named
//!   [`config::Preset`]s for common use cases
//! * **Observability**: `log` output plus an optional [`event::EventHandler`] callback
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reflectllm::clients::ollama::OllamaClient;
//! use reflectllm::config::{Preset, ReflectionConfig};
//! use reflectllm::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() {
//!     reflectllm::init_logger();
//!
//!     let config = ReflectionConfig::from_preset(Preset::Research);
//!     let client = Arc::new(OllamaClient::from_config(&config));
//!     let mut orchestrator = Orchestrator::from_config(client, &config);
//!
//!     let report = orchestrator.check_prerequisites().await;
//!     if !report.is_ready() {
//!         eprintln!("backend not ready: {:?}", report);
//!         return;
//!     }
//!
//!     let result = orchestrator
//!         .run("What are the main differences between supervised and unsupervised learning?", 3, true)
//!         .await;
//!
//!     println!("Iterations: {}", result.iterations);
//!     println!("Converged: {}", if result.converged { "Yes" } else { "No" });
//!     println!("{}", result.final_response);
//! }
//! ```
//!
//! ## Error Channel
//!
//! Backend failures are typed ([`client_wrapper::BackendError`]) at the client boundary.
//! Inside the loop they are folded into their display text (`"Error: HTTP 503"`) and treated
//! as ordinary output, so a run always completes; every [`orchestration::IterationRecord`]
//! flags which texts came from failures.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// The helper is intentionally lightweight so that applications embedding reflectllm can
/// opt-in to simple `RUST_LOG` driven diagnostics without having to choose a specific
/// logging backend upfront.
///
/// ```rust
/// reflectllm::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `reflectllm` module.
pub mod reflectllm;

// Re-exporting key items for easier external access.
pub use reflectllm::agent;
pub use reflectllm::agent::{PromptContext, Role, RoleAgent, RoleConfig};
pub use reflectllm::client_wrapper;
pub use reflectllm::client_wrapper::{BackendError, ClientWrapper, GenerationRequest, TokenUsage};
pub use reflectllm::clients;
pub use reflectllm::config;
pub use reflectllm::config::ReflectionConfig;
pub use reflectllm::convergence;
pub use reflectllm::convergence::ConvergenceDetector;
pub use reflectllm::event;
pub use reflectllm::event::{AgentEvent, EventHandler, OrchestrationEvent};
pub use reflectllm::orchestration;
pub use reflectllm::orchestration::{
    IterationRecord, Orchestrator, RefinementPhase, RefinementResponse,
};
