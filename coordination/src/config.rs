//! Runtime configuration for the scheduler, refinement loop, debate and guardrails.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (e.g. `ORCH_MAX_CONCURRENCY`)
//! 2. Values from a TOML file ([`OrchestrationConfig::load`])
//! 3. Built-in defaults
//!
//! ## Defaults
//!
//! | Setting                         | Default  |
//! |---------------------------------|----------|
//! | `scheduler.max_concurrency`     | 4        |
//! | `scheduler.task_timeout_secs`   | 300      |
//! | `refinement.max_rounds`         | 3        |
//! | `refinement.score_threshold`    | 90.0     |
//! | `refinement.score_source`       | `rubric` |
//! | `debate.rounds`                 | 3        |
//! | `guardrails.max_input_bytes`    | 5 MiB    |

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_ROUNDS: u32 = 3;
const DEFAULT_SCORE_THRESHOLD: f64 = 90.0;
const DEFAULT_SCORE_SOURCE: &str = "rubric";
const DEFAULT_DEBATE_ROUNDS: u32 = 3;
const DEFAULT_MAX_INPUT_BYTES: usize = 5 * 1024 * 1024;

const ENV_MAX_CONCURRENCY: &str = "ORCH_MAX_CONCURRENCY";
const ENV_TASK_TIMEOUT_SECS: &str = "ORCH_TASK_TIMEOUT_SECS";
const ENV_REFINE_MAX_ROUNDS: &str = "ORCH_REFINE_MAX_ROUNDS";
const ENV_REFINE_THRESHOLD: &str = "ORCH_REFINE_THRESHOLD";
const ENV_DEBATE_ROUNDS: &str = "ORCH_DEBATE_ROUNDS";

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("refinement.score_threshold must be within 0..=100, got {0}")]
    ThresholdOutOfRange(f64),

    #[error("refinement.score_source must not be empty")]
    EmptyScoreSource,

    #[error("guardrails.min_input_bytes ({min}) exceeds max_input_bytes ({max})")]
    InputBounds { min: usize, max: usize },

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}

/// Task-graph scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrency: usize,
    /// Per-task deadline in seconds (`None` disables the deadline).
    pub task_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout_secs: Some(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

/// Critique/refine loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Round cap, including the first review round.
    pub max_rounds: u32,
    /// Minimum score the designated score report must reach.
    pub score_threshold: f64,
    /// Source name of the report whose score gates the loop.
    pub score_source: String,
    /// Deadline for each reviewer call, in seconds.
    pub reviewer_timeout_secs: Option<u64>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            score_source: DEFAULT_SCORE_SOURCE.to_string(),
            reviewer_timeout_secs: Some(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl RefinementConfig {
    pub fn reviewer_timeout(&self) -> Option<Duration> {
        self.reviewer_timeout_secs.map(Duration::from_secs)
    }
}

/// Peer debate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Number of position rounds (round 0 included).
    pub rounds: u32,
    /// Deadline for each participant call, in seconds.
    pub call_timeout_secs: Option<u64>,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_DEBATE_ROUNDS,
            call_timeout_secs: Some(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl DebateConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Built-in guardrail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub max_input_bytes: usize,
    pub min_input_bytes: usize,
    /// Scrub emails, phone numbers and id numbers from objectives.
    pub redact_pii: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            min_input_bytes: 1,
            redact_pii: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub scheduler: SchedulerConfig,
    pub refinement: RefinementConfig,
    pub debate: DebateConfig,
    pub guardrails: GuardrailConfig,
}

impl OrchestrationConfig {
    /// Parse a TOML document. Missing sections and keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse orchestration config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| env::var(var).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, ENV_MAX_CONCURRENCY)? {
            self.scheduler.max_concurrency = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_TASK_TIMEOUT_SECS)? {
            self.scheduler.task_timeout_secs = Some(v);
        }
        if let Some(v) = parse_override(&lookup, ENV_REFINE_MAX_ROUNDS)? {
            self.refinement.max_rounds = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_REFINE_THRESHOLD)? {
            self.refinement.score_threshold = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_DEBATE_ROUNDS)? {
            self.debate.rounds = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "scheduler.max_concurrency",
            });
        }
        if self.refinement.max_rounds == 0 {
            return Err(ConfigError::Zero {
                field: "refinement.max_rounds",
            });
        }
        let threshold = self.refinement.score_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        if self.refinement.score_source.trim().is_empty() {
            return Err(ConfigError::EmptyScoreSource);
        }
        if self.debate.rounds == 0 {
            return Err(ConfigError::Zero {
                field: "debate.rounds",
            });
        }
        let g = &self.guardrails;
        if g.min_input_bytes > g.max_input_bytes {
            return Err(ConfigError::InputBounds {
                min: g.min_input_bytes,
                max: g.max_input_bytes,
            });
        }
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
