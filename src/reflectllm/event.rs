//! Agent and Orchestrator event system.
//!
//! Provides a callback-based observability layer for the refinement loop.
//! Implement [`EventHandler`] to receive real-time notifications about:
//!
//! - **Backend round-trips**: When a role agent sends a prompt and what came back
//! - **Backend failures**: Calls whose result was a [`BackendError`] folded into text
//! - **Run lifecycle**: Run start/end and iteration boundaries with the active phase
//! - **Convergence**: The outcome of every feedback check
//!
//! Both trait methods have default no-op implementations, so you only override what
//! you care about. The handler is wrapped in `Arc<dyn EventHandler>`; when registered on
//! an [`Orchestrator`](crate::orchestration::Orchestrator) via
//! [`with_event_handler`](crate::orchestration::Orchestrator::with_event_handler) it is
//! propagated to both role agents.
//!
//! # Example
//!
//! ```rust,no_run
//! use reflectllm::event::{AgentEvent, EventHandler, OrchestrationEvent};
//! use async_trait::async_trait;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl EventHandler for MyHandler {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::CallFailed { agent_name, error, .. } = event {
//!             eprintln!("{} failed: {}", agent_name, error);
//!         }
//!     }
//!     async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
//!         println!("Orchestrator: {:?}", event);
//!     }
//! }
//! ```

use crate::agent::Role;
use crate::client_wrapper::{BackendError, TokenUsage};
use crate::orchestration::RefinementPhase;
use async_trait::async_trait;
use uuid::Uuid;

/// Events emitted by a [`RoleAgent`](crate::agent::RoleAgent) around each backend call.
///
/// ```text
/// CallStarted { invocation: n }
///   └─ CallCompleted { invocation: n }   (generated text)
///   └─ CallFailed { invocation: n }      (BackendError)
/// ```
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired after the prompt is built, right before the backend call.
    CallStarted {
        agent_name: String,
        role: Role,
        /// 1-based invocation counter of this agent.
        invocation: usize,
        /// In bytes.
        prompt_length: usize,
    },

    /// Fired when the backend returned generated text.
    CallCompleted {
        agent_name: String,
        role: Role,
        invocation: usize,
        /// Length of the generated text in bytes.
        response_length: usize,
        /// `None` if the backend did not report usage.
        tokens_used: Option<TokenUsage>,
    },

    /// Fired when the backend call failed. The agent still hands the error's
    /// display text to its caller as if it were an answer.
    CallFailed {
        agent_name: String,
        role: Role,
        invocation: usize,
        error: BackendError,
    },
}

/// Events emitted by the [`Orchestrator`](crate::orchestration::Orchestrator) during `run()`.
///
/// ```text
/// RunStarted
///   └─ IterationStarted { iteration: 1, phase: Running }
///       ├─ AnswerGenerated
///       ├─ FeedbackReceived
///       └─ ConvergenceChecked
///   └─ IterationStarted { iteration: N, phase: FinalGeneration }
///       └─ AnswerGenerated
/// RunCompleted { phase: Converged | Exhausted }
/// ```
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    RunStarted {
        run_id: Uuid,
        /// First ~120 characters of the query.
        query_preview: String,
        max_iterations: usize,
    },

    IterationStarted {
        run_id: Uuid,
        iteration: usize,
        max_iterations: usize,
        /// `Running` when a critique follows, `FinalGeneration` otherwise.
        phase: RefinementPhase,
    },

    AnswerGenerated {
        run_id: Uuid,
        iteration: usize,
        /// In bytes.
        response_length: usize,
        failed: bool,
    },

    FeedbackReceived {
        run_id: Uuid,
        iteration: usize,
        /// In bytes.
        response_length: usize,
        failed: bool,
    },

    ConvergenceChecked {
        run_id: Uuid,
        iteration: usize,
        converged: bool,
        /// The marker phrase that matched, when converged.
        marker: Option<String>,
    },

    RunCompleted {
        run_id: Uuid,
        iterations: usize,
        converged: bool,
        phase: RefinementPhase,
        total_tokens: usize,
    },
}

/// Receives [`AgentEvent`]s and [`OrchestrationEvent`]s.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    async fn on_orchestration_event(&self, _event: &OrchestrationEvent) {}
}
