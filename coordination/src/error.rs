//! Orchestration error taxonomy.
//!
//! Every failure in the coordination core is represented here. Callers can
//! classify an error with [`OrchestrationError::kind`] without string matching,
//! and per-task failures are recorded as [`TaskFailure`] so that run reports
//! stay serializable and never carry a raw backend error.
//!
//! ## Propagation
//!
//! | Kind                 | Scope                       | Effect on the run            |
//! |----------------------|-----------------------------|------------------------------|
//! | Validation           | graph / objective / config  | abort before dispatch        |
//! | Model                | single collaborator call    | task Failed, dependents Blocked |
//! | Timeout              | single collaborator call    | task Failed, dependents Blocked |
//! | ModerationRejected   | guardrail stage             | abort immediately            |
//! | GateNotMet           | refinement round            | non-fatal, DoneWithWarnings  |
//! | UnresolvableGraph    | graph                       | abort before / during dispatch |
//! | NoWorkerForRole      | role resolution             | abort before any dispatch    |
//! | Cancelled            | cancellation token          | task Failed, dependents Blocked |

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::Role;

/// Result alias used throughout the crate.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Structural problems with a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The dependency relation contains a cycle through `task`.
    #[error("dependency cycle detected through task '{task}'")]
    Cycle { task: String },

    /// `task` depends on an id that does not exist in the graph.
    #[error("task '{task}' depends on unknown task '{missing}'")]
    DanglingDependency { task: String, missing: String },

    /// Two tasks share the same id.
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),

    /// Pending tasks remain but none can become ready.
    #[error("no runnable tasks but {} still pending: {}", pending.len(), pending.join(", "))]
    Deadlock { pending: Vec<String> },
}

/// Unified error type for all coordination operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Malformed graph, objective, decomposition or configuration.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The model backend (or any collaborator acting for it) failed.
    #[error("Model error: {0}")]
    Model(String),

    /// A collaborator call exceeded its deadline.
    #[error("Timeout: {operation} exceeded {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A guardrail rejected input or output content.
    #[error("Moderation rejected at {stage} by {guardrail}: {reason}")]
    ModerationRejected {
        stage: String,
        guardrail: String,
        reason: String,
    },

    /// A refinement gate was not met once the round budget was spent.
    #[error("Gate not met after {rounds} round(s): score {score:?} vs threshold {threshold}, failing: {}", failing.join(", "))]
    GateNotMet {
        rounds: u32,
        score: Option<f64>,
        threshold: f64,
        failing: Vec<String>,
    },

    /// The task graph cannot be executed to completion.
    #[error("Unresolvable graph: {0}")]
    UnresolvableGraph(#[from] GraphError),

    /// A task or sub-problem names a role with no registered agent.
    #[error("No worker registered for role '{0}'")]
    NoWorkerForRole(Role),

    /// The run was cancelled through its cancellation token.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A named agent failed during a specific stage (debate round, delegation).
    #[error("Agent '{agent}' failed during {stage}: {source}")]
    AgentFailed {
        agent: String,
        stage: String,
        #[source]
        source: Box<OrchestrationError>,
    },
}

impl OrchestrationError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Model(_) => ErrorKind::Model,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ModerationRejected { .. } => ErrorKind::ModerationRejected,
            Self::GateNotMet { .. } => ErrorKind::GateNotMet,
            Self::UnresolvableGraph(_) => ErrorKind::UnresolvableGraph,
            Self::NoWorkerForRole(_) => ErrorKind::NoWorkerForRole,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::AgentFailed { source, .. } => source.kind(),
        }
    }

    /// Whether this error must abort the whole run rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::ModerationRejected
                | ErrorKind::UnresolvableGraph
                | ErrorKind::NoWorkerForRole
        )
    }

    /// Attribute this error to a named agent and stage.
    pub fn attributed(self, agent: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::AgentFailed {
            agent: agent.into(),
            stage: stage.into(),
            source: Box::new(self),
        }
    }
}

/// Serializable classification of an [`OrchestrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Model,
    Timeout,
    ModerationRejected,
    GateNotMet,
    UnresolvableGraph,
    NoWorkerForRole,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Model => write!(f, "model"),
            Self::Timeout => write!(f, "timeout"),
            Self::ModerationRejected => write!(f, "moderation_rejected"),
            Self::GateNotMet => write!(f, "gate_not_met"),
            Self::UnresolvableGraph => write!(f, "unresolvable_graph"),
            Self::NoWorkerForRole => write!(f, "no_worker_for_role"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A recorded failure: classification plus rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestrationError> for TaskFailure {
    fn from(err: &OrchestrationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Run `fut` under an optional deadline.
///
/// `None` means no deadline. Expiry is reported as
/// [`OrchestrationError::Timeout`] naming `operation`.
pub async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: &str,
    fut: F,
) -> OrchestrationResult<T>
where
    F: Future<Output = OrchestrationResult<T>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Timeout {
                operation: operation.to_string(),
                after,
            }),
        },
        None => fut.await,
    }
}
