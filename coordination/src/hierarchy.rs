//! Manager / worker delegation.
//!
//! The manager decomposes a problem into role-tagged sub-problems. Every role
//! reference is checked before anything runs; the sub-problems then execute
//! as a task graph (independent ones share a frontier and run in parallel)
//! and a merger combines the completed outputs. A cancellation token is
//! checked before decomposition, before dispatch and before the merge.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentContext, AgentRegistry, AgentRegistryBuilder, Role, SharedAgent};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::graph::{Scheduler, TaskGraph, TaskOutcome, TaskSpec, TaskStatus};

/// One unit of delegated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProblem {
    pub id: String,
    pub description: String,
    pub role: Role,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SubProblem {
    pub fn new(id: impl Into<String>, description: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

impl From<SubProblem> for TaskSpec {
    fn from(sub: SubProblem) -> Self {
        TaskSpec {
            id: sub.id,
            description: sub.description,
            role: sub.role,
            dependencies: sub.depends_on,
        }
    }
}

/// Decomposes a problem into sub-problems.
#[async_trait]
pub trait Manager: Send + Sync {
    fn id(&self) -> &str;

    async fn decompose(&self, problem: &str) -> OrchestrationResult<Vec<SubProblem>>;
}

/// Combines worker outputs (in decomposition order) into a final solution.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, problem: &str, outputs: &[(String, String)]) -> OrchestrationResult<String>;
}

/// [`Manager`] and [`Merger`] backed by a single agent, as in a classic
/// manager that both plans and integrates.
pub struct AgentManager {
    agent: SharedAgent,
}

impl AgentManager {
    pub fn new(agent: SharedAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Manager for AgentManager {
    fn id(&self) -> &str {
        self.agent.id()
    }

    async fn decompose(&self, problem: &str) -> OrchestrationResult<Vec<SubProblem>> {
        let context = AgentContext::new(
            "Break the problem into sub-problems. Answer with JSON: \
             [{\"id\": str, \"description\": str, \"role\": str, \"depends_on\": [str]}]",
        )
        .with_brief(problem);
        let output = self.agent.invoke(context).await?;
        let parsed = match output.structured {
            Some(value) => serde_json::from_value(value),
            None => serde_json::from_str(output.content.trim()),
        };
        parsed.map_err(|e| OrchestrationError::Validation(format!("malformed decomposition: {e}")))
    }
}

#[async_trait]
impl Merger for AgentManager {
    async fn merge(&self, problem: &str, outputs: &[(String, String)]) -> OrchestrationResult<String> {
        let mut context =
            AgentContext::new("Merge the worker results into one final solution.").with_brief(problem);
        for (id, output) in outputs {
            context = context.with_input(id.clone(), output.clone());
        }
        Ok(self.agent.invoke(context).await?.content)
    }
}

/// Result of [`HierarchicalDelegator::solve_problem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub problem: String,
    pub manager: String,
    pub solution: String,
    pub sub_problems: Vec<SubProblem>,
    pub outcomes: Vec<TaskOutcome>,
}

impl Solution {
    /// Sub-problems that failed or were blocked.
    pub fn unsolved(&self) -> Vec<&TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != TaskStatus::Completed)
            .collect()
    }
}

/// Manager-led delegation over role-specialized workers.
pub struct HierarchicalDelegator {
    manager: Option<Arc<dyn Manager>>,
    merger: Option<Arc<dyn Merger>>,
    workers: AgentRegistryBuilder,
    scheduler: Scheduler,
    cancel: CancellationToken,
}

impl Default for HierarchicalDelegator {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchicalDelegator {
    pub fn new() -> Self {
        Self {
            manager: None,
            merger: None,
            workers: AgentRegistry::builder(),
            scheduler: Scheduler::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_manager(&mut self, manager: Arc<dyn Manager>) {
        self.manager = Some(manager);
    }

    /// Use an agent as both manager and merger.
    pub fn set_manager_agent(&mut self, agent: SharedAgent) {
        let manager = Arc::new(AgentManager::new(agent));
        self.manager = Some(manager.clone());
        self.merger = Some(manager);
    }

    pub fn set_merger(&mut self, merger: Arc<dyn Merger>) {
        self.merger = Some(merger);
    }

    pub fn add_worker(&mut self, role: Role, agent: SharedAgent) {
        self.workers.insert(role, agent);
    }

    /// Replace the scheduler; it is wired to this delegator's token.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler.with_cancellation(self.cancel.clone());
        self
    }

    /// Share `token` with the scheduler and check it between stages.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.scheduler = self.scheduler.clone().with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    fn check_cancelled(&self, stage: &str) -> OrchestrationResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled(format!(
                "delegation cancelled before {stage}"
            )));
        }
        Ok(())
    }

    /// Decompose, validate every role, run the sub-problems, merge.
    ///
    /// Fails with [`OrchestrationError::NoWorkerForRole`] before dispatching
    /// anything if any sub-problem names an unregistered role. Fails if no
    /// sub-problem completes; otherwise merges whatever completed.
    pub async fn solve_problem(&self, problem: &str) -> OrchestrationResult<Solution> {
        let manager = self.manager.as_ref().ok_or_else(|| {
            OrchestrationError::Validation("no manager set for delegation".to_string())
        })?;
        let merger = self.merger.as_ref().ok_or_else(|| {
            OrchestrationError::Validation("no merger set for delegation".to_string())
        })?;
        if problem.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "problem must not be empty".to_string(),
            ));
        }

        self.check_cancelled("decomposition")?;
        let sub_problems = manager
            .decompose(problem)
            .await
            .map_err(|e| e.attributed(manager.id(), "decomposition"))?;
        if sub_problems.is_empty() {
            return Err(OrchestrationError::Validation(
                "manager produced no sub-problems".to_string(),
            ));
        }

        let registry = self.workers.snapshot();
        registry.ensure_roles(sub_problems.iter().map(|s| s.role))?;

        let mut graph = TaskGraph::build(sub_problems.iter().cloned().map(TaskSpec::from).collect())?
            .with_brief(problem);
        info!(
            manager = manager.id(),
            sub_problems = graph.len(),
            "delegating sub-problems"
        );
        self.check_cancelled("dispatch")?;
        let execution = self.scheduler.execute(&mut graph, &registry).await?;
        self.check_cancelled("merge")?;

        let outputs = execution.results();
        if outputs.is_empty() {
            return Err(OrchestrationError::Model(format!(
                "all {} sub-problems failed",
                execution.outcomes.len()
            )));
        }
        if !execution.is_success() {
            warn!(
                solved = outputs.len(),
                total = execution.outcomes.len(),
                "merging partial worker results"
            );
        }

        let solution = merger
            .merge(problem, &outputs)
            .await
            .map_err(|e| e.attributed(manager.id(), "merge"))?;

        Ok(Solution {
            problem: problem.to_string(),
            manager: manager.id().to_string(),
            solution,
            sub_problems,
            outcomes: execution.outcomes,
        })
    }
}
