//! Role agents
//!
//! This module provides the [`RoleAgent`] struct that binds one of the two refinement
//! roles ([`Role::Generator`] or [`Role::Critic`]) to a fixed [`RoleConfig`] and a shared
//! backend client.
//!
//! Prompt construction is owned by the closed [`Role`] enum: each variant builds its own
//! prompt from the input text and an optional [`PromptContext`]. The agent itself only
//! counts invocations, delegates to the client, and reports what happened through an
//! optional [`EventHandler`](crate::event::EventHandler).
//!
//! # Example
//!
//! ```rust,no_run
//! use reflectllm::agent::{Role, RoleAgent, RoleConfig};
//! use reflectllm::clients::ollama::OllamaClient;
//! use std::sync::Arc;
//!
//! # async {
//! let mut critic = RoleAgent::new(
//!     RoleConfig::new("Critic", Role::Critic, "granite3-moe:1b").with_temperature(0.5),
//!     Arc::new(OllamaClient::default()),
//! );
//!
//! let feedback = critic.process("Paris is the capital of France.", None).await;
//! println!("{} ({} calls)", feedback, critic.invocation_count());
//! # };
//! ```

use crate::client_wrapper::{
    BackendError, ClientWrapper, GenerationRequest, SamplingOptions, TokenUsage,
};
use crate::config::RoleSettings;
use crate::event::{AgentEvent, EventHandler};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const GENERATOR_SYSTEM_INSTRUCTION: &str = "You are a Generator Agent specializing in creating comprehensive, accurate responses.

Your responsibilities:
- Analyze user queries carefully and provide detailed, well-structured responses
- Draw upon your knowledge to give informative answers
- Be clear, concise, and accurate
- Structure your responses with proper formatting when appropriate
- If you receive feedback, incorporate it to improve your response

Focus on quality and completeness. Your response will be reviewed by a Critic Agent.";

pub const CRITIC_SYSTEM_INSTRUCTION: &str = "You are a Critic Agent specializing in evaluating and improving responses.

Your responsibilities:
- Review the Generator's response critically but constructively
- Identify gaps, inaccuracies, or areas for improvement
- Provide specific, actionable feedback
- Suggest concrete improvements
- Acknowledge what was done well
- Focus on substance over style

Format your feedback as:
STRENGTHS: [What was done well]
IMPROVEMENTS NEEDED: [Specific issues to address]
SUGGESTIONS: [Concrete recommendations]

Be thorough but fair. Your goal is to help improve the response, not to criticize unnecessarily.";

/// The two participants of the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Produces or revises the candidate answer.
    Generator,
    /// Evaluates a candidate answer and emits structured feedback.
    Critic,
}

impl Role {
    /// Build this role's prompt for `input`.
    ///
    /// The generator asks for a revision only when the context carries non-empty
    /// feedback; otherwise it restates `input` as a fresh query. The critic falls back
    /// to `input` as the original query when no context is given.
    pub fn build_prompt(self, input: &str, context: Option<&PromptContext>) -> String {
        match self {
            Role::Generator => match context.and_then(PromptContext::revision) {
                Some((query, previous, feedback)) => format!(
                    "Original Query: {}\n\n\
                     Previous Response:\n{}\n\n\
                     Feedback from Critic:\n{}\n\n\
                     Please provide an improved response that addresses the feedback while maintaining quality.",
                    query, previous, feedback
                ),
                None => format!(
                    "User Query: {}\n\nProvide a comprehensive response:",
                    input
                ),
            },
            Role::Critic => {
                let query = context.map_or(input, |ctx| ctx.query.as_str());
                format!(
                    "Original Query: {}\n\n\
                     Response to Evaluate:\n{}\n\n\
                     Provide constructive feedback following the specified format.",
                    query, input
                )
            }
        }
    }

    pub fn default_system_instruction(self) -> &'static str {
        match self {
            Role::Generator => GENERATOR_SYSTEM_INSTRUCTION,
            Role::Critic => CRITIC_SYSTEM_INSTRUCTION,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Generator => "Generator",
            Role::Critic => "Critic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Generator => write!(f, "generator"),
            Role::Critic => write!(f, "critic"),
        }
    }
}

/// What a role sees besides its direct input.
///
/// Revisions carry only the immediately preceding answer/feedback pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub query: String,
    pub previous_response: Option<String>,
    pub feedback: Option<String>,
}

impl PromptContext {
    /// Context handed to the critic: just the original query.
    pub fn for_critique(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            previous_response: None,
            feedback: None,
        }
    }

    /// Context handed to the generator on iterations after the first.
    pub fn for_revision(
        query: impl Into<String>,
        previous_response: impl Into<String>,
        feedback: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            previous_response: Some(previous_response.into()),
            feedback: Some(feedback.into()),
        }
    }

    fn revision(&self) -> Option<(&str, &str, &str)> {
        match self.feedback.as_deref() {
            Some(feedback) if !feedback.is_empty() => Some((
                self.query.as_str(),
                self.previous_response.as_deref().unwrap_or(""),
                feedback,
            )),
            _ => None,
        }
    }
}

/// Identity and model parameters of one role. Owned exclusively by its agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub role: Role,
    pub system_instruction: String,
    pub model_id: String,
    /// Clamped to `0.0..=1.0`.
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub top_p: Option<f32>,
}

impl RoleConfig {
    /// Role defaults: the built-in instruction, temperature 0.7, 2048 output tokens.
    pub fn new(name: impl Into<String>, role: Role, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            system_instruction: role.default_system_instruction().to_string(),
            model_id: model_id.into(),
            temperature: 0.7,
            max_output_tokens: 2048,
            top_p: None,
        }
    }

    pub fn from_settings(
        role: Role,
        settings: &RoleSettings,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self::new(role.display_name(), role, settings.model.clone())
            .with_system_instruction(system_instruction)
            .with_temperature(settings.temperature)
            .with_max_output_tokens(settings.max_tokens)
            .with_top_p(settings.top_p)
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p.clamp(0.0, 1.0));
        self
    }

    fn sampling(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: Some(self.max_output_tokens),
        }
    }
}

/// One role bound to a backend client.
pub struct RoleAgent {
    config: RoleConfig,
    client: Arc<dyn ClientWrapper>,
    invocation_count: usize,
    failure_count: usize,
    last_usage: Option<TokenUsage>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl RoleAgent {
    pub fn new(config: RoleConfig, client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            config,
            client,
            invocation_count: 0,
            failure_count: 0,
            last_usage: None,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Used by [`Orchestrator::with_event_handler`](crate::orchestration::Orchestrator::with_event_handler)
    /// to share its handler with both agents.
    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    pub fn config(&self) -> &RoleConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Calls made over this agent's lifetime, successful or not.
    pub fn invocation_count(&self) -> usize {
        self.invocation_count
    }

    /// Calls whose backend result was an error.
    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    /// Token usage reported for the most recent call, if the backend reports it.
    pub fn last_usage(&self) -> Option<&TokenUsage> {
        self.last_usage.as_ref()
    }

    /// Run one call and keep backend failures distinguishable from model output.
    pub async fn try_process(
        &mut self,
        input: &str,
        context: Option<&PromptContext>,
    ) -> Result<String, BackendError> {
        self.invocation_count += 1;
        let invocation = self.invocation_count;

        let request = GenerationRequest {
            model: self.config.model_id.clone(),
            prompt: self.config.role.build_prompt(input, context),
            system: self.config.system_instruction.clone(),
            options: self.config.sampling(),
        };

        self.emit(AgentEvent::CallStarted {
            agent_name: self.config.name.clone(),
            role: self.config.role,
            invocation,
            prompt_length: request.prompt.len(),
        })
        .await;
        debug!(
            "{} call #{} via {} ({} chars)",
            self.config.name,
            invocation,
            self.client.backend_name(),
            request.prompt.len()
        );

        match self.client.generate(&request).await {
            Ok(text) => {
                self.last_usage = self.client.get_last_usage().await;
                self.emit(AgentEvent::CallCompleted {
                    agent_name: self.config.name.clone(),
                    role: self.config.role,
                    invocation,
                    response_length: text.len(),
                    tokens_used: self.last_usage.clone(),
                })
                .await;
                Ok(text)
            }
            Err(err) => {
                self.failure_count += 1;
                self.last_usage = None;
                warn!(
                    "{} call #{} failed ({}): {}",
                    self.config.name,
                    invocation,
                    err.kind(),
                    err
                );
                self.emit(AgentEvent::CallFailed {
                    agent_name: self.config.name.clone(),
                    role: self.config.role,
                    invocation,
                    error: err.clone(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Run one call, folding a backend failure into its error string.
    ///
    /// The returned text is whatever the backend produced, unvalidated, or e.g.
    /// `"Error: HTTP 500"` when the call failed.
    pub async fn process(&mut self, input: &str, context: Option<&PromptContext>) -> String {
        fold_backend_result(self.try_process(input, context).await).0
    }
}

/// Error-as-text: a failed call contributes its error string as if it were output.
/// The flag is `true` when the text is a folded [`BackendError`].
pub(crate) fn fold_backend_result(result: Result<String, BackendError>) -> (String, bool) {
    match result {
        Ok(text) => (text, false),
        Err(err) => (err.to_string(), true),
    }
}
