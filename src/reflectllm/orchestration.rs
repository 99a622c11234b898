//! Generator/Critic refinement orchestration
//!
//! This module drives the two-role reflection loop: a generator answers the user's query,
//! a critic reviews the answer, and the generator revises against the feedback until the
//! critic signals convergence or the iteration budget runs out.
//!
//! # State Machine
//!
//! ```text
//! Idle → Running ──(critique matched a marker)──→ Converged
//!          │  ↑
//!          └──┘ (feedback carried into the next revision)
//!          │
//!          └──→ FinalGeneration ──→ Exhausted
//! ```
//!
//! The last allotted iteration never runs a critique, so with `max_iterations == 1` the
//! loop is a single unreviewed generation ("quick mode").
//!
//! # Failure Semantics
//!
//! The orchestrator performs no recovery. A failed backend call yields the error's
//! display text (e.g. `"Error: HTTP 500"`), which flows into the next prompt and the final
//! result exactly like a real answer. Each [`IterationRecord`] flags which of its texts
//! came from a failure, and [`RefinementResponse::backend_failures`] counts them.
//!
//! # Example
//!
//! ```rust,no_run
//! use reflectllm::clients::ollama::OllamaClient;
//! use reflectllm::orchestration::Orchestrator;
//! use std::sync::Arc;
//!
//! # async {
//! let mut orchestrator = Orchestrator::new(Arc::new(OllamaClient::default()));
//!
//! let result = orchestrator
//!     .run("Explain the key principles of quantum computing in simple terms.", 3, true)
//!     .await;
//!
//! println!("{} iterations, converged: {}", result.iterations, result.converged);
//! println!("{}", result.final_response);
//! # };
//! ```

use crate::agent::{fold_backend_result, PromptContext, Role, RoleAgent, RoleConfig};
use crate::client_wrapper::ClientWrapper;
use crate::config::ReflectionConfig;
use crate::convergence::ConvergenceDetector;
use crate::event::{EventHandler, OrchestrationEvent};
use chrono::{DateTime, Utc};
use log::{debug, info, log, Level};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Phase of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefinementPhase {
    /// Run created, no iteration started yet.
    Idle,
    /// An iteration that generates and then critiques.
    Running,
    /// The last allowed iteration; its answer is not reviewed.
    FinalGeneration,
    /// A critique matched a convergence marker.
    Converged,
    /// The iteration budget was used up without convergence.
    Exhausted,
}

impl RefinementPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted)
    }

    /// Phase an iteration runs in, given the budget.
    fn for_iteration(iteration: usize, max_iterations: usize) -> Self {
        if iteration < max_iterations {
            Self::Running
        } else {
            Self::FinalGeneration
        }
    }
}

impl fmt::Display for RefinementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::FinalGeneration => write!(f, "final_generation"),
            Self::Converged => write!(f, "converged"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Log entry for one completed iteration. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based.
    pub iteration_number: usize,
    pub generator_output: String,
    /// `None` exactly when the iteration ran no critique.
    pub critic_feedback: Option<String>,
    /// `generator_output` is a folded backend error.
    pub generator_failed: bool,
    /// `critic_feedback` is a folded backend error.
    pub critic_failed: bool,
    pub completed_at: DateTime<Utc>,
}

/// Mutable state of a single `run`. Created fresh per call and handed back in the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub query: String,
    pub latest_answer: String,
    pub latest_feedback: String,
    pub iteration: usize,
    pub max_iterations: usize,
    pub converged: bool,
    pub phase: RefinementPhase,
    pub history: Vec<IterationRecord>,
}

impl ConversationState {
    pub fn new(query: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            query: query.into(),
            latest_answer: String::new(),
            latest_feedback: String::new(),
            iteration: 0,
            max_iterations,
            converged: false,
            phase: RefinementPhase::Idle,
            history: Vec::new(),
        }
    }

    /// The immediately preceding answer/feedback pair, never the full history.
    fn revision_context(&self) -> PromptContext {
        PromptContext::for_revision(
            self.query.clone(),
            self.latest_answer.clone(),
            self.latest_feedback.clone(),
        )
    }

    fn record(&mut self, critic_feedback: Option<String>, generator_failed: bool, critic_failed: bool) {
        self.history.push(IterationRecord {
            iteration_number: self.iteration,
            generator_output: self.latest_answer.clone(),
            critic_feedback,
            generator_failed,
            critic_failed,
            completed_at: Utc::now(),
        });
    }
}

/// The result of an [`Orchestrator::run`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementResponse {
    /// Identifier shared by every event of this run.
    pub run_id: Uuid,
    /// The last generator output.
    pub final_response: String,
    /// Iterations reached (equal to `history.len()`).
    pub iterations: usize,
    pub converged: bool,
    /// `Converged` or `Exhausted`.
    pub phase: RefinementPhase,
    pub history: Vec<IterationRecord>,
    /// Generator invocations over the orchestrator's lifetime.
    pub generator_calls: usize,
    /// Critic invocations over the orchestrator's lifetime.
    pub critic_calls: usize,
    /// Role calls in this run whose text is a folded backend error.
    pub backend_failures: usize,
    /// Tokens reported by the backend during this run (zero if it reports none).
    pub total_tokens_used: usize,
}

/// Outcome of [`Orchestrator::check_prerequisites`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub backend_reachable: bool,
    /// Role models the backend does not list.
    pub missing_models: Vec<String>,
}

impl PrerequisiteReport {
    pub fn is_ready(&self) -> bool {
        self.backend_reachable && self.missing_models.is_empty()
    }
}

/// Owns the generator and critic agents and drives the refinement loop.
///
/// Agents, their counters, and the convergence detector live as long as the
/// orchestrator. Runs are sequential: [`run`](Orchestrator::run) takes `&mut self`
/// and awaits one backend call at a time.
pub struct Orchestrator {
    client: Arc<dyn ClientWrapper>,
    generator: RoleAgent,
    critic: RoleAgent,
    detector: ConvergenceDetector,
    default_max_iterations: usize,
    default_verbose: bool,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Orchestrator {
    /// Orchestrator with [`ReflectionConfig::default`] roles and markers.
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self::from_config(client, &ReflectionConfig::default())
    }

    pub fn from_config(client: Arc<dyn ClientWrapper>, config: &ReflectionConfig) -> Self {
        let generator = RoleAgent::new(
            RoleConfig::from_settings(
                Role::Generator,
                &config.generator,
                config.generator_instruction.clone(),
            ),
            Arc::clone(&client),
        );
        let critic = RoleAgent::new(
            RoleConfig::from_settings(Role::Critic, &config.critic, config.critic_instruction.clone()),
            Arc::clone(&client),
        );

        if config.max_retries > 0 {
            debug!(
                "max_retries={} is not applied: each role call is a single attempt",
                config.max_retries
            );
        }

        Self {
            client,
            generator,
            critic,
            detector: config.convergence_detector(),
            default_max_iterations: config.max_iterations,
            default_verbose: config.verbose,
            event_handler: None,
        }
    }

    /// Replace the generator's configuration. Its counters start over.
    pub fn with_generator(mut self, config: RoleConfig) -> Self {
        self.generator = self.build_agent(config);
        self
    }

    /// Replace the critic's configuration. Its counters start over.
    pub fn with_critic(mut self, config: RoleConfig) -> Self {
        self.critic = self.build_agent(config);
        self
    }

    pub fn with_convergence_detector(mut self, detector: ConvergenceDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Attach an event handler and propagate it to both agents.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.generator.set_event_handler(Arc::clone(&handler));
        self.critic.set_event_handler(Arc::clone(&handler));
        self.event_handler = Some(handler);
        self
    }

    fn build_agent(&self, config: RoleConfig) -> RoleAgent {
        let agent = RoleAgent::new(config, Arc::clone(&self.client));
        match &self.event_handler {
            Some(handler) => agent.with_event_handler(Arc::clone(handler)),
            None => agent,
        }
    }

    async fn emit(&self, event: OrchestrationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_orchestration_event(&event).await;
        }
    }

    pub fn generator(&self) -> &RoleAgent {
        &self.generator
    }

    pub fn critic(&self) -> &RoleAgent {
        &self.critic
    }

    pub fn convergence_detector(&self) -> &ConvergenceDetector {
        &self.detector
    }

    /// Probe the backend and both role models. Never fails; unknown means "not ready".
    pub async fn check_prerequisites(&self) -> PrerequisiteReport {
        if !self.client.is_reachable().await {
            return PrerequisiteReport {
                backend_reachable: false,
                missing_models: Vec::new(),
            };
        }

        let mut models = vec![
            self.generator.config().model_id.clone(),
            self.critic.config().model_id.clone(),
        ];
        models.dedup();

        let mut missing_models = Vec::new();
        for model in models {
            if !self.client.has_model(&model).await {
                missing_models.push(model);
            }
        }

        PrerequisiteReport {
            backend_reachable: true,
            missing_models,
        }
    }

    /// [`run`](Orchestrator::run) with the configured iteration budget and verbosity.
    pub async fn run_with_defaults(&mut self, query: &str) -> RefinementResponse {
        let (max_iterations, verbose) = (self.default_max_iterations, self.default_verbose);
        self.run(query, max_iterations, verbose).await
    }

    /// Refine an answer to `query` for at most `max_iterations` iterations.
    ///
    /// With `verbose`, every answer and critique is logged at `info` level instead of
    /// `debug`. Backend failures never abort the run.
    pub async fn run(&mut self, query: &str, max_iterations: usize, verbose: bool) -> RefinementResponse {
        let run_id = Uuid::new_v4();
        let detail = if verbose { Level::Info } else { Level::Debug };
        let mut state = ConversationState::new(query, max_iterations);
        let mut backend_failures = 0;
        let mut total_tokens = 0;

        log!(
            detail,
            "Starting refinement run {}: query={:?} max_iterations={}",
            run_id,
            query,
            max_iterations
        );
        self.emit(OrchestrationEvent::RunStarted {
            run_id,
            query_preview: query.chars().take(120).collect(),
            max_iterations,
        })
        .await;

        for iteration in 1..=max_iterations {
            state.iteration = iteration;
            state.phase = RefinementPhase::for_iteration(iteration, max_iterations);

            self.emit(OrchestrationEvent::IterationStarted {
                run_id,
                iteration,
                max_iterations,
                phase: state.phase,
            })
            .await;

            // Generator phase
            let generated = if iteration == 1 {
                self.generator.try_process(query, None).await
            } else {
                let context = state.revision_context();
                self.generator.try_process(query, Some(&context)).await
            };
            total_tokens += self.generator.last_usage().map_or(0, |u| u.total_tokens);
            let (answer, generator_failed) = fold_backend_result(generated);
            if generator_failed {
                backend_failures += 1;
            }
            state.latest_answer = answer;

            log!(
                detail,
                "Generator response (iteration {}/{}):\n{}",
                iteration,
                max_iterations,
                state.latest_answer
            );
            self.emit(OrchestrationEvent::AnswerGenerated {
                run_id,
                iteration,
                response_length: state.latest_answer.len(),
                failed: generator_failed,
            })
            .await;

            if state.phase == RefinementPhase::FinalGeneration {
                state.record(None, generator_failed, false);
                state.phase = RefinementPhase::Exhausted;
                break;
            }

            // Critic phase
            let context = PromptContext::for_critique(query);
            let critique = self
                .critic
                .try_process(&state.latest_answer, Some(&context))
                .await;
            total_tokens += self.critic.last_usage().map_or(0, |u| u.total_tokens);
            let (feedback, critic_failed) = fold_backend_result(critique);
            if critic_failed {
                backend_failures += 1;
            }
            state.latest_feedback = feedback;

            log!(
                detail,
                "Critic feedback (iteration {}/{}):\n{}",
                iteration,
                max_iterations,
                state.latest_feedback
            );
            self.emit(OrchestrationEvent::FeedbackReceived {
                run_id,
                iteration,
                response_length: state.latest_feedback.len(),
                failed: critic_failed,
            })
            .await;

            let marker = self
                .detector
                .matched_marker(&state.latest_feedback)
                .map(str::to_string);
            let converged = marker.is_some();
            self.emit(OrchestrationEvent::ConvergenceChecked {
                run_id,
                iteration,
                converged,
                marker,
            })
            .await;

            state.record(Some(state.latest_feedback.clone()), generator_failed, critic_failed);

            if converged {
                state.converged = true;
                state.phase = RefinementPhase::Converged;
                log!(detail, "Converged: response quality satisfactory");
                break;
            }
        }

        if !state.phase.is_terminal() {
            // Only reachable with a zero budget.
            state.phase = RefinementPhase::Exhausted;
        }

        info!(
            "Refinement run {} finished: phase={} iterations={} generator_calls={} critic_calls={} failures={}",
            run_id,
            state.phase,
            state.iteration,
            self.generator.invocation_count(),
            self.critic.invocation_count(),
            backend_failures
        );
        self.emit(OrchestrationEvent::RunCompleted {
            run_id,
            iterations: state.iteration,
            converged: state.converged,
            phase: state.phase,
            total_tokens,
        })
        .await;

        RefinementResponse {
            run_id,
            final_response: state.latest_answer,
            iterations: state.iteration,
            converged: state.converged,
            phase: state.phase,
            history: state.history,
            generator_calls: self.generator.invocation_count(),
            critic_calls: self.critic.invocation_count(),
            backend_failures,
            total_tokens_used: total_tokens,
        }
    }
}
