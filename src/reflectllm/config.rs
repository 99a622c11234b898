//! Configuration for reflectllm.
//!
//! Provides the [`ReflectionConfig`] struct enumerating every recognised option of the
//! refinement loop, plus the named [`Preset`]s. Users construct this manually; no file
//! parsing dependencies are required; a presentation layer that reads TOML or
//! environment variables hands the result in as a plain value.
//!
//! # Example
//!
//! ```rust
//! use reflectllm::config::{Preset, ReflectionConfig};
//!
//! // Use the defaults (local Ollama, granite3-moe:1b, three iterations)
//! let config = ReflectionConfig::default();
//! assert_eq!(config.max_iterations, 3);
//!
//! // Or start from a preset
//! let config = ReflectionConfig::default().with_preset(Preset::Technical);
//! assert_eq!(config.max_iterations, 2);
//! assert_eq!(config.generator.temperature, 0.2);
//! ```

use crate::agent::{CRITIC_SYSTEM_INSTRUCTION, GENERATOR_SYSTEM_INSTRUCTION};
use crate::clients::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT};
use crate::convergence::{ConvergenceDetector, ConvergenceMarker};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Model and sampling parameters for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSettings {
    pub model: String,
    /// Creativity level (0.0-1.0).
    pub temperature: f32,
    /// Maximum response length in tokens.
    pub max_tokens: usize,
    /// Nucleus sampling threshold.
    pub top_p: f32,
}

impl RoleSettings {
    pub fn generator() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 0.9,
        }
    }

    /// Lower temperature for more analytical feedback; feedback is typically shorter.
    pub fn critic() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            max_tokens: 1024,
            top_p: 0.8,
        }
    }
}

/// A role section as written in a configuration document; absent fields are `None`.
#[derive(Deserialize)]
struct RoleSettingsPatch {
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    top_p: Option<f32>,
}

impl RoleSettingsPatch {
    fn apply(self, base: RoleSettings) -> RoleSettings {
        RoleSettings {
            model: self.model.unwrap_or(base.model),
            temperature: self.temperature.unwrap_or(base.temperature),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            top_p: self.top_p.unwrap_or(base.top_p),
        }
    }
}

fn generator_settings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RoleSettings, D::Error> {
    Ok(RoleSettingsPatch::deserialize(deserializer)?.apply(RoleSettings::generator()))
}

fn critic_settings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RoleSettings, D::Error> {
    Ok(RoleSettingsPatch::deserialize(deserializer)?.apply(RoleSettings::critic()))
}

/// Every option the refinement core recognises.
///
/// `max_retries` and `retry_delay_secs` are carried for configuration-file
/// compatibility only: each role call is a single attempt.
///
/// Deserialization accepts partial documents: missing options, and missing fields
/// inside a role section, keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Root URL of the Ollama server.
    pub base_url: String,
    #[serde(deserialize_with = "generator_settings")]
    pub generator: RoleSettings,
    #[serde(deserialize_with = "critic_settings")]
    pub critic: RoleSettings,
    pub generator_instruction: String,
    pub critic_instruction: String,
    /// Iteration budget used by [`Orchestrator::run_with_defaults`](crate::orchestration::Orchestrator::run_with_defaults).
    pub max_iterations: usize,
    pub convergence_markers: Vec<ConvergenceMarker>,
    /// Per-request bound in milliseconds; `0` means the default.
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub verbose: bool,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            generator: RoleSettings::generator(),
            critic: RoleSettings::critic(),
            generator_instruction: GENERATOR_SYSTEM_INSTRUCTION.to_string(),
            critic_instruction: CRITIC_SYSTEM_INSTRUCTION.to_string(),
            max_iterations: 3,
            convergence_markers: ConvergenceMarker::defaults(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            max_retries: 3,
            retry_delay_secs: 2,
            verbose: true,
        }
    }
}

impl ReflectionConfig {
    pub fn from_preset(preset: Preset) -> Self {
        Self::default().with_preset(preset)
    }

    /// Apply a preset's temperatures and iteration budget, keeping everything else.
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.generator.temperature = preset.generator_temperature();
        self.critic.temperature = preset.critic_temperature();
        self.max_iterations = preset.max_iterations();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Use the same model for both roles.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.generator.model = model.clone();
        self.critic.model = model;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_convergence_markers(mut self, markers: Vec<ConvergenceMarker>) -> Self {
        self.convergence_markers = markers;
        self
    }

    /// A zero `timeout` selects the default; anything shorter than a millisecond rounds up to one.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = if timeout.is_zero() {
            0
        } else {
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
        };
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        match self.request_timeout_ms {
            0 => DEFAULT_REQUEST_TIMEOUT,
            ms => Duration::from_millis(ms),
        }
    }

    pub fn convergence_detector(&self) -> ConvergenceDetector {
        ConvergenceDetector::new(self.convergence_markers.clone())
    }
}

/// Tuned starting points for common use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    Research,
    Creative,
    Technical,
    /// A single unreviewed generation.
    Quick,
    Thorough,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Research,
        Preset::Creative,
        Preset::Technical,
        Preset::Quick,
        Preset::Thorough,
    ];

    pub fn generator_temperature(self) -> f32 {
        match self {
            Preset::Research => 0.3,
            Preset::Creative => 0.9,
            Preset::Technical => 0.2,
            Preset::Quick => 0.5,
            Preset::Thorough => 0.4,
        }
    }

    pub fn critic_temperature(self) -> f32 {
        match self {
            Preset::Research => 0.4,
            Preset::Creative => 0.7,
            Preset::Technical => 0.3,
            Preset::Quick => 0.5,
            Preset::Thorough => 0.3,
        }
    }

    pub fn max_iterations(self) -> usize {
        match self {
            Preset::Research | Preset::Creative => 3,
            Preset::Technical => 2,
            Preset::Quick => 1,
            Preset::Thorough => 5,
        }
    }

    pub fn focus(self) -> &'static str {
        match self {
            Preset::Research => "accuracy and completeness",
            Preset::Creative => "originality and engagement",
            Preset::Technical => "precision and technical accuracy",
            Preset::Quick => "speed over perfection",
            Preset::Thorough => "exhaustive analysis",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::Research => "research",
            Preset::Creative => "creative",
            Preset::Technical => "technical",
            Preset::Quick => "quick",
            Preset::Thorough => "thorough",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Preset::ALL
            .iter()
            .copied()
            .find(|preset| preset.name() == wanted)
            .ok_or_else(|| format!("Unknown preset: {}", s))
    }
}
