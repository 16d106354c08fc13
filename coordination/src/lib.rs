//! Agent Coordination Library
//!
//! Coordination core for multi-agent language-model workflows:
//!
//! - **Task graphs**: an objective is planned into a DAG of role-tagged tasks
//!   and executed frontier by frontier with bounded concurrency
//!   ([`TaskGraph`], [`Scheduler`], [`Orchestrator`])
//! - **Refinement**: parallel reviewers, a quality gate and a refiner run for
//!   a bounded number of rounds ([`RefinementLoop`])
//! - **Debate**: fixed-round peer position exchange ending in a consensus
//!   ([`DebateCoordinator`])
//! - **Delegation**: a manager decomposes, role workers solve, a merger
//!   combines ([`HierarchicalDelegator`])
//!
//! Model backends, planners, reviewers and the like are collaborators: narrow
//! async traits the caller implements. The crate never talks to a model itself.
//!
//! # Usage
//!
//! ```ignore
//! let registry = AgentRegistry::builder()
//!     .agent(researcher)
//!     .agent(analyst)
//!     .agent(writer)
//!     .build();
//! let orchestrator = Orchestrator::new(planner, synthesizer, registry)
//!     .with_config(&OrchestrationConfig::from_env()?);
//! let report = orchestrator.execute_objective("Write a blog post on remote work").await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod config;
pub mod debate;
pub mod error;
pub mod graph;
pub mod guardrails;
pub mod hierarchy;
pub mod orchestrator;
pub mod refinement;
pub mod telemetry;

// Re-export agent types
pub use agent::{
    Agent, AgentContext, AgentOutput, AgentRegistry, AgentRegistryBuilder, ContextEntry,
    ModelAgent, ModelInvoker, Role, SharedAgent,
};

// Re-export error and config types
pub use config::{
    ConfigError, DebateConfig, GuardrailConfig, OrchestrationConfig, RefinementConfig,
    SchedulerConfig,
};
pub use error::{ErrorKind, GraphError, OrchestrationError, OrchestrationResult, TaskFailure};

// Re-export task graph types
pub use graph::{ExecutionReport, Scheduler, Task, TaskGraph, TaskId, TaskOutcome, TaskSpec, TaskStatus};

// Re-export guardrail types
pub use guardrails::{
    Guardrail, GuardrailChain, GuardrailStage, GuardrailVerdict, ModerationClassifier,
    ModerationGuardrail, ModerationResult, PiiRedactor, SizeLimitGuardrail,
};

// Re-export orchestrator types
pub use orchestrator::{
    AgentPlanner, AgentSynthesizer, FailureRecord, ObjectiveReport, Orchestrator, Planner,
    RunStage, RunStatus, Synthesizer,
};

// Re-export refinement types
pub use refinement::{
    merge_sections, AgentReviewer, CritiqueReport, Drafter, GateDecision, QualityGate, Refiner,
    RefinementLoop, RefinementOutcome, RefinementState, RefinementStatus, ReportStatus,
    ReviewArtifact, Reviewer, RoundRecord, Section,
};

// Re-export debate types
pub use debate::{
    AgentConsensusSynthesizer, Consensus, ConsensusDraft, ConsensusSynthesizer, DebateCoordinator,
    Position,
};

// Re-export delegation types
pub use hierarchy::{AgentManager, HierarchicalDelegator, Manager, Merger, Solution, SubProblem};

pub use telemetry::init_tracing;
