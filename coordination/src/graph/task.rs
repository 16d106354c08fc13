//! Task nodes and their lifecycle.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::Role;
use crate::error::TaskFailure;

/// Unique identifier for a task within a graph.
pub type TaskId = String;

/// Lifecycle status of a task.
///
/// ```text
/// Pending → Ready → Running → Completed
///    │        │         └───→ Failed
///    │        └─────────────→ Failed (worker never started)
///    └──→ Blocked (a transitive dependency failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Ready, Self::Blocked],
            Self::Ready => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Blocked => &[],
        }
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Planner output for one task: what to do, who does it, what it waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub description: String,
    pub role: Role,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub role: Role,
    pub dependencies: BTreeSet<TaskId>,
    pub status: TaskStatus,
    /// Rendered context the task was dispatched with.
    pub input: Option<String>,
    pub result: Option<String>,
    pub error: Option<TaskFailure>,
    /// Failed task that caused this one to be blocked.
    pub blocked_by: Option<TaskId>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id,
            description: spec.description,
            role: spec.role,
            dependencies: spec.dependencies.into_iter().collect(),
            status: TaskStatus::Pending,
            input: None,
            result: None,
            error: None,
            blocked_by: None,
        }
    }
}
