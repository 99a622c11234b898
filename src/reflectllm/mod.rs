// src/reflectllm/mod.rs

pub mod agent;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod convergence;
pub mod event;
pub mod orchestration;

// Let's explicitly export Orchestrator so we don't have to access it via reflectllm::orchestration::Orchestrator
// and instead as reflectllm::Orchestrator
pub use agent::RoleAgent;
pub use orchestration::Orchestrator;
