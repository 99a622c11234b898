use async_trait::async_trait;
use reflectllm::agent::{PromptContext, Role, CRITIC_SYSTEM_INSTRUCTION};
use reflectllm::client_wrapper::{BackendError, ClientWrapper, GenerationRequest, TokenUsage};
use reflectllm::config::{ReflectionConfig, RoleSettings};
use reflectllm::convergence::ConvergenceMarker;
use reflectllm::event::{AgentEvent, EventHandler, OrchestrationEvent};
use reflectllm::orchestration::{Orchestrator, RefinementPhase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<String, BackendError> + Send + Sync>;

struct MockClient {
    responder: Responder,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockClient {
    fn new(
        responder: impl Fn(&GenerationRequest) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Generator always says `answer`, critic always says `feedback`.
    fn fixed(answer: &str, feedback: &str) -> Arc<Self> {
        let (answer, feedback) = (answer.to_string(), feedback.to_string());
        Self::new(move |request| {
            if is_critic(request) {
                Ok(feedback.clone())
            } else {
                Ok(answer.clone())
            }
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn generator_prompts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| !is_critic(r))
            .map(|r| r.prompt)
            .collect()
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

fn is_critic(request: &GenerationRequest) -> bool {
    request.system == CRITIC_SYSTEM_INSTRUCTION
}

#[tokio::test]
async fn test_single_iteration_skips_the_critic() {
    let client = MockClient::fixed("ANSWER", "no significant improvements needed");
    let mut orchestrator = Orchestrator::new(client.clone());

    let result = orchestrator.run("What is X?", 1, false).await;

    assert_eq!(result.iterations, 1);
    assert!(!result.converged);
    assert_eq!(result.phase, RefinementPhase::Exhausted);
    assert_eq!(result.history.len(), 1);
    assert_eq!(result.history[0].critic_feedback, None);
    assert_eq!(result.final_response, "ANSWER");
    assert_eq!(result.generator_calls, 1);
    assert_eq!(result.critic_calls, 0);
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn test_full_budget_without_convergence() {
    let client = MockClient::fixed("ANSWER", "IMPROVEMENTS NEEDED: more detail");
    let mut orchestrator = Orchestrator::new(client.clone());

    let result = orchestrator.run("What is X?", 4, false).await;

    assert_eq!(result.iterations, 4);
    assert!(!result.converged);
    assert_eq!(result.phase, RefinementPhase::Exhausted);
    assert_eq!(result.generator_calls, 4);
    assert_eq!(result.critic_calls, 3);
    assert_eq!(result.history.len(), 4);
    for (index, record) in result.history.iter().enumerate() {
        assert_eq!(record.iteration_number, index + 1);
        if index < 3 {
            assert_eq!(
                record.critic_feedback.as_deref(),
                Some("IMPROVEMENTS NEEDED: more detail")
            );
        } else {
            assert_eq!(record.critic_feedback, None);
        }
    }
}

#[tokio::test]
async fn test_converges_on_the_iteration_whose_feedback_has_the_marker() {
    let critic_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&critic_calls);
    let client = MockClient::new(move |request| {
        if is_critic(request) {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 2 {
                Ok("STRENGTHS: all of it. No Significant Improvements Needed.".to_string())
            } else {
                Ok("IMPROVEMENTS NEEDED: examples".to_string())
            }
        } else {
            Ok("ANSWER".to_string())
        }
    });
    let mut orchestrator = Orchestrator::new(client);

    let result = orchestrator.run("What is X?", 5, false).await;

    assert_eq!(result.iterations, 2);
    assert!(result.converged);
    assert_eq!(result.phase, RefinementPhase::Converged);
    assert_eq!(result.history.len(), 2);
    assert!(result.history.iter().all(|r| r.critic_feedback.is_some()));
    assert_eq!(result.generator_calls, 2);
    assert_eq!(result.critic_calls, 2);
}

#[tokio::test]
async fn test_end_to_end_example() {
    let client = MockClient::fixed("ANSWER", "no significant improvements needed on first call");
    let mut orchestrator = Orchestrator::new(client);

    let result = orchestrator.run("What is X?", 2, true).await;

    assert_eq!(result.iterations, 1);
    assert!(result.converged);
    assert_eq!(result.history.len(), 1);
    let record = &result.history[0];
    assert_eq!(record.iteration_number, 1);
    assert_eq!(record.generator_output, "ANSWER");
    assert_eq!(
        record.critic_feedback.as_deref(),
        Some("no significant improvements needed on first call")
    );
    assert_eq!(result.generator_calls, 1);
    assert_eq!(result.critic_calls, 1);
    assert_eq!(result.final_response, "ANSWER");
}

#[tokio::test]
async fn test_revision_context_is_only_the_previous_pair() {
    // Echo backend: every role answers with the prompt it received.
    let client = MockClient::new(|request| Ok(request.prompt.clone()));
    let mut orchestrator = Orchestrator::new(client.clone());

    let result = orchestrator.run("What is X?", 3, false).await;
    let prompts = client.generator_prompts();

    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[0], Role::Generator.build_prompt("What is X?", None));
    for i in 1..3 {
        let previous = &result.history[i - 1];
        let expected = Role::Generator.build_prompt(
            "What is X?",
            Some(&PromptContext::for_revision(
                "What is X?",
                previous.generator_output.clone(),
                previous.critic_feedback.clone().unwrap(),
            )),
        );
        assert_eq!(prompts[i], expected);
    }

    // The critic reviews exactly the answer produced in the same iteration.
    let critic_prompts: Vec<String> = client
        .requests()
        .into_iter()
        .filter(is_critic)
        .map(|r| r.prompt)
        .collect();
    assert_eq!(
        critic_prompts[1],
        Role::Critic.build_prompt(
            &result.history[1].generator_output,
            Some(&PromptContext::for_critique("What is X?"))
        )
    );
}

#[tokio::test]
async fn test_backend_failure_flows_through_as_text() {
    let client = MockClient::new(|request| {
        if is_critic(request) {
            Ok("IMPROVEMENTS NEEDED: try again".to_string())
        } else {
            Err(BackendError::Status(500))
        }
    });
    let mut orchestrator = Orchestrator::new(client.clone());

    let result = orchestrator.run("What is X?", 3, false).await;

    assert_eq!(result.iterations, 3);
    assert_eq!(result.final_response, "Error: HTTP 500");
    assert_eq!(result.backend_failures, 3);
    assert!(result.history.iter().all(|r| r.generator_failed));
    assert!(result.history.iter().all(|r| !r.critic_failed));
    assert_eq!(orchestrator.generator().failure_count(), 3);

    let critic_prompt = client
        .requests()
        .into_iter()
        .find(is_critic)
        .map(|r| r.prompt)
        .unwrap();
    assert!(critic_prompt.contains("Response to Evaluate:\nError: HTTP 500"));
}

#[tokio::test]
async fn test_zero_budget_makes_no_calls() {
    let client = MockClient::fixed("ANSWER", "feedback");
    let mut orchestrator = Orchestrator::new(client.clone());

    let result = orchestrator.run("What is X?", 0, false).await;

    assert_eq!(result.iterations, 0);
    assert_eq!(result.final_response, "");
    assert!(result.history.is_empty());
    assert_eq!(result.phase, RefinementPhase::Exhausted);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn test_counters_accumulate_across_runs() {
    let client = MockClient::fixed("ANSWER", "IMPROVEMENTS NEEDED: more");
    let mut orchestrator = Orchestrator::new(client);

    let first = orchestrator.run("first", 2, false).await;
    let second = orchestrator.run("second", 2, false).await;

    assert_eq!((first.generator_calls, first.critic_calls), (2, 1));
    assert_eq!((second.generator_calls, second.critic_calls), (4, 2));
    assert_eq!(second.history.len(), 2);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_role_settings_reach_the_backend() {
    let client = MockClient::fixed("ANSWER", "IMPROVEMENTS NEEDED: more");
    let config = ReflectionConfig {
        generator: RoleSettings {
            model: "gen-model".into(),
            ..RoleSettings::generator()
        },
        critic: RoleSettings {
            model: "critic-model".into(),
            ..RoleSettings::critic()
        },
        ..ReflectionConfig::default()
    };
    let mut orchestrator = Orchestrator::from_config(client.clone(), &config);

    orchestrator.run("What is X?", 2, false).await;
    let requests = client.requests();

    assert_eq!(requests[0].model, "gen-model");
    assert_eq!(requests[0].options.temperature, 0.7);
    assert_eq!(requests[0].options.max_tokens, Some(2048));
    assert_eq!(requests[1].model, "critic-model");
    assert_eq!(requests[1].options.temperature, 0.5);
    assert_eq!(requests[1].options.top_p, Some(0.8));
    assert_eq!(requests[1].system, CRITIC_SYSTEM_INSTRUCTION);
}

#[tokio::test]
async fn test_run_with_defaults_uses_configured_budget_and_markers() {
    let client = MockClient::fixed("ANSWER", "An excellent response.");
    let config = ReflectionConfig::default()
        .with_max_iterations(4)
        .with_verbose(false)
        .with_convergence_markers(vec![
            ConvergenceMarker::new("no significant improvements needed"),
            ConvergenceMarker::new("excellent response"),
        ]);
    let mut orchestrator = Orchestrator::from_config(client, &config);

    let result = orchestrator.run_with_defaults("What is X?").await;

    assert!(result.converged);
    assert_eq!(result.iterations, 1);
}

#[derive(Default)]
struct RecordingHandler {
    orchestration: Mutex<Vec<String>>,
    agent: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        let label = match event {
            AgentEvent::CallStarted { role, .. } => format!("started:{}", role),
            AgentEvent::CallCompleted { role, .. } => format!("completed:{}", role),
            AgentEvent::CallFailed { role, .. } => format!("failed:{}", role),
        };
        self.agent.lock().unwrap().push(label);
    }

    async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
        let label = match event {
            OrchestrationEvent::RunStarted { .. } => "run_started".to_string(),
            OrchestrationEvent::IterationStarted { iteration, phase, .. } => {
                format!("iteration:{}:{}", iteration, phase)
            }
            OrchestrationEvent::AnswerGenerated { .. } => "answer".to_string(),
            OrchestrationEvent::FeedbackReceived { .. } => "feedback".to_string(),
            OrchestrationEvent::ConvergenceChecked { converged, .. } => {
                format!("converged:{}", converged)
            }
            OrchestrationEvent::RunCompleted { phase, .. } => format!("run_completed:{}", phase),
        };
        self.orchestration.lock().unwrap().push(label);
    }
}

#[tokio::test]
async fn test_events_follow_the_state_machine() {
    let handler = Arc::new(RecordingHandler::default());
    let client = MockClient::fixed("ANSWER", "IMPROVEMENTS NEEDED: more");
    let mut orchestrator = Orchestrator::new(client).with_event_handler(handler.clone());

    orchestrator.run("What is X?", 2, false).await;

    assert_eq!(
        *handler.orchestration.lock().unwrap(),
        vec![
            "run_started",
            "iteration:1:running",
            "answer",
            "feedback",
            "converged:false",
            "iteration:2:final_generation",
            "answer",
            "run_completed:exhausted",
        ]
    );
    assert_eq!(
        *handler.agent.lock().unwrap(),
        vec![
            "started:generator",
            "completed:generator",
            "started:critic",
            "completed:critic",
            "started:generator",
            "completed:generator",
        ]
    );
}

#[tokio::test]
async fn test_failed_calls_are_reported_as_events() {
    let handler = Arc::new(RecordingHandler::default());
    let client = MockClient::new(|_| Err(BackendError::Unreachable("connection refused".into())));
    let mut orchestrator = Orchestrator::new(client).with_event_handler(handler.clone());

    let result = orchestrator.run("What is X?", 1, false).await;

    assert_eq!(result.final_response, "Error: connection refused");
    assert_eq!(
        *handler.agent.lock().unwrap(),
        vec!["started:generator", "failed:generator"]
    );
}

struct MeteredClient {
    usage: tokio::sync::Mutex<Option<TokenUsage>>,
}

#[async_trait]
impl ClientWrapper for MeteredClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        *self.usage.lock().await = Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        if is_critic(request) {
            Ok("IMPROVEMENTS NEEDED: more".to_string())
        } else {
            Ok("ANSWER".to_string())
        }
    }

    fn usage_slot(&self) -> Option<&tokio::sync::Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[tokio::test]
async fn test_token_usage_is_summed_per_run() {
    let client = Arc::new(MeteredClient {
        usage: tokio::sync::Mutex::new(None),
    });
    let mut orchestrator = Orchestrator::new(client);

    let result = orchestrator.run("What is X?", 3, false).await;

    // 3 generator calls + 2 critic calls
    assert_eq!(result.total_tokens_used, 75);
    assert_eq!(orchestrator.critic().last_usage().map(|u| u.total_tokens), Some(15));
}

struct HealthClient {
    reachable: bool,
    models: Vec<String>,
}

#[async_trait]
impl ClientWrapper for HealthClient {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, BackendError> {
        Ok(String::new())
    }

    async fn is_reachable(&self) -> bool {
        self.reachable
    }

    async fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|name| name.contains(model))
    }
}

#[tokio::test]
async fn test_prerequisites_report_missing_models_once() {
    let client = Arc::new(HealthClient {
        reachable: true,
        models: vec!["llama3:8b".to_string()],
    });
    let orchestrator = Orchestrator::new(client);

    let report = orchestrator.check_prerequisites().await;

    assert!(report.backend_reachable);
    assert_eq!(report.missing_models, vec!["granite3-moe:1b".to_string()]);
    assert!(!report.is_ready());
}

#[tokio::test]
async fn test_prerequisites_unreachable_backend() {
    let client = Arc::new(HealthClient {
        reachable: false,
        models: vec!["granite3-moe:1b".to_string()],
    });
    let orchestrator = Orchestrator::new(client);

    let report = orchestrator.check_prerequisites().await;

    assert!(!report.backend_reachable);
    assert!(!report.is_ready());

    let ready = Orchestrator::new(Arc::new(HealthClient {
        reachable: true,
        models: vec!["granite3-moe:1b-latest".to_string()],
    }))
    .check_prerequisites()
    .await;
    assert!(ready.is_ready());
}
