//! Objective orchestration: guard → plan → execute → synthesize → guard.
//!
//! ```text
//! objective
//!    │ input guardrails  (rejection aborts)
//!    ▼
//! Planner::plan ──▶ TaskGraph::build  (invalid plan aborts)
//!    │
//!    ▼
//! Scheduler::execute  (task failures recorded, dependents blocked)
//!    │ ≥ 1 completed task
//!    ▼
//! Synthesizer::synthesize(results in task order)
//!    │ output guardrails  (rejection withholds the synthesis)
//!    ▼
//! ObjectiveReport
//! ```
//!
//! [`Orchestrator::execute_objective`] never returns an error: every outcome,
//! including hard aborts, is an [`ObjectiveReport`] with stage-attributed
//! failures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentContext, AgentOutput, AgentRegistry, SharedAgent};
use crate::config::OrchestrationConfig;
use crate::error::{ErrorKind, OrchestrationError, OrchestrationResult};
use crate::graph::{ExecutionReport, Scheduler, TaskGraph, TaskId, TaskOutcome, TaskSpec, TaskStatus};
use crate::guardrails::{GuardrailChain, GuardrailStage};

/// Turns an objective into ordered task descriptors.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, objective: &str) -> OrchestrationResult<Vec<TaskSpec>>;
}

/// Produces the final answer from task results in original task order.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        objective: &str,
        results: &[(TaskId, String)],
    ) -> OrchestrationResult<String>;
}

/// [`Planner`] backed by an agent (normally the coordinator) that answers
/// with a JSON task list: either `[{..}, ..]` or `{"tasks": [{..}, ..]}`.
pub struct AgentPlanner {
    agent: SharedAgent,
}

impl AgentPlanner {
    pub fn new(agent: SharedAgent) -> Self {
        Self { agent }
    }
}

const PLANNER_INSTRUCTION: &str = "Break the objective into tasks. Answer with JSON: \
     {\"tasks\": [{\"id\": str, \"description\": str, \"role\": str, \"dependencies\": [str]}]}";

#[async_trait]
impl Planner for AgentPlanner {
    async fn plan(&self, objective: &str) -> OrchestrationResult<Vec<TaskSpec>> {
        let output = self
            .agent
            .invoke(AgentContext::new(PLANNER_INSTRUCTION).with_brief(objective))
            .await?;
        parse_task_list(&output)
    }
}

fn parse_task_list(output: &AgentOutput) -> OrchestrationResult<Vec<TaskSpec>> {
    let value = match &output.structured {
        Some(value) => value.clone(),
        None => serde_json::from_str(output.content.trim()).map_err(|e| {
            OrchestrationError::Validation(format!("planner output is not JSON: {e}"))
        })?,
    };
    let list = match value {
        serde_json::Value::Object(mut map) => map
            .remove("tasks")
            .ok_or_else(|| OrchestrationError::Validation("planner output has no 'tasks'".into()))?,
        other => other,
    };
    serde_json::from_value(list)
        .map_err(|e| OrchestrationError::Validation(format!("malformed planner task list: {e}")))
}

/// [`Synthesizer`] backed by an agent; task results are passed as context.
pub struct AgentSynthesizer {
    agent: SharedAgent,
}

impl AgentSynthesizer {
    pub fn new(agent: SharedAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Synthesizer for AgentSynthesizer {
    async fn synthesize(
        &self,
        objective: &str,
        results: &[(TaskId, String)],
    ) -> OrchestrationResult<String> {
        let mut context = AgentContext::new(
            "Synthesize the task results into one coherent final answer.",
        )
        .with_brief(objective);
        for (id, result) in results {
            context = context.with_input(id.clone(), result.clone());
        }
        Ok(self.agent.invoke(context).await?.content)
    }
}

/// Stage of a run a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    InputGuardrail,
    Planning,
    Execution,
    Task,
    Synthesis,
    OutputGuardrail,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputGuardrail => write!(f, "input_guardrail"),
            Self::Planning => write!(f, "planning"),
            Self::Execution => write!(f, "execution"),
            Self::Task => write!(f, "task"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::OutputGuardrail => write!(f, "output_guardrail"),
        }
    }
}

/// One attributed failure in an [`ObjectiveReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: RunStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureRecord {
    fn from_error(stage: RunStage, err: &OrchestrationError) -> Self {
        Self {
            stage,
            task_id: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Overall result of [`Orchestrator::execute_objective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed and a synthesis was produced.
    Succeeded,
    /// A synthesis was produced, but some tasks failed or were blocked.
    PartiallySucceeded,
    /// The graph ran but no synthesis could be produced.
    Failed,
    /// A hard failure stopped the run (validation, planning, moderation).
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartiallySucceeded => write!(f, "partially_succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Structured outcome of an objective run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveReport {
    pub run_id: Uuid,
    /// Objective after input guardrails (redacted). Empty when the input
    /// guardrails rejected it.
    pub objective: String,
    pub status: RunStatus,
    pub tasks: Vec<TaskOutcome>,
    pub rounds: Vec<Vec<TaskId>>,
    pub synthesis: Option<String>,
    pub failures: Vec<FailureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ObjectiveReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            objective: String::new(),
            status: RunStatus::Aborted,
            tasks: Vec::new(),
            rounds: Vec::new(),
            synthesis: None,
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn abort(mut self, stage: RunStage, err: &OrchestrationError) -> Self {
        error!(run_id = %self.run_id, stage = %stage, error = %err, "run aborted");
        self.failures.push(FailureRecord::from_error(stage, err));
        self.status = RunStatus::Aborted;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn task(&self, id: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Plans an objective into a task graph, drives it, and synthesizes a result.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    synthesizer: Arc<dyn Synthesizer>,
    registry: AgentRegistry,
    scheduler: Scheduler,
    input_guardrails: GuardrailChain,
    output_guardrails: GuardrailChain,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        synthesizer: Arc<dyn Synthesizer>,
        registry: AgentRegistry,
    ) -> Self {
        Self {
            planner,
            synthesizer,
            registry,
            scheduler: Scheduler::default(),
            input_guardrails: GuardrailChain::new(),
            output_guardrails: GuardrailChain::new(),
        }
    }

    /// Scheduler settings and built-in input guardrails from `config`.
    pub fn with_config(mut self, config: &OrchestrationConfig) -> Self {
        self.scheduler = Scheduler::new(config.scheduler.clone())
            .with_cancellation(self.scheduler.cancellation_token());
        self.input_guardrails = GuardrailChain::from_config(&config.guardrails);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_input_guardrails(mut self, chain: GuardrailChain) -> Self {
        self.input_guardrails = chain;
        self
    }

    pub fn with_output_guardrails(mut self, chain: GuardrailChain) -> Self {
        self.output_guardrails = chain;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Ask the planner for tasks and build a validated graph.
    pub async fn plan(&self, objective: &str) -> OrchestrationResult<TaskGraph> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(OrchestrationError::Validation(
                "objective must not be empty".to_string(),
            ));
        }
        let specs = self.planner.plan(objective).await?;
        if specs.is_empty() {
            return Err(OrchestrationError::Validation(
                "planner produced no tasks".to_string(),
            ));
        }
        let graph = TaskGraph::build(specs)?.with_brief(objective);
        info!(tasks = graph.len(), "objective planned");
        Ok(graph)
    }

    /// Run `graph` through the scheduler against this orchestrator's registry.
    pub async fn execute(&self, graph: &mut TaskGraph) -> OrchestrationResult<ExecutionReport> {
        self.scheduler.execute(graph, &self.registry).await
    }

    /// Synthesize completed task results, in original task order.
    pub async fn synthesize(
        &self,
        objective: &str,
        report: &ExecutionReport,
    ) -> OrchestrationResult<String> {
        let results = report.results();
        if results.is_empty() {
            return Err(OrchestrationError::Validation(
                "no completed task results to synthesize".to_string(),
            ));
        }
        self.synthesizer.synthesize(objective, &results).await
    }

    /// Full run. Always returns a report; see the module docs for which
    /// failures abort and which are recorded.
    pub async fn execute_objective(&self, objective: &str) -> ObjectiveReport {
        let report = ObjectiveReport::new();
        info!(run_id = %report.run_id, "objective run started");

        let objective = match self
            .input_guardrails
            .apply(GuardrailStage::Input, objective.to_string())
            .await
        {
            Ok(clean) => clean,
            Err(err) => return report.abort(RunStage::InputGuardrail, &err),
        };
        let mut report = ObjectiveReport {
            objective: objective.clone(),
            ..report
        };

        let mut graph = match self.plan(&objective).await {
            Ok(graph) => graph,
            Err(err) => return report.abort(RunStage::Planning, &err),
        };

        let execution = match self.execute(&mut graph).await {
            Ok(execution) => execution,
            Err(err) => return report.abort(RunStage::Execution, &err),
        };
        report.failures.extend(task_failures(&execution));
        report.tasks = execution.outcomes.clone();
        report.rounds = execution.rounds.clone();

        if execution.completed_count() > 0 {
            match self.synthesize(&objective, &execution).await {
                Ok(text) => {
                    match self
                        .output_guardrails
                        .apply(GuardrailStage::Output, text)
                        .await
                    {
                        Ok(clean) => report.synthesis = Some(clean),
                        Err(err) => return report.abort(RunStage::OutputGuardrail, &err),
                    }
                }
                Err(err) => {
                    warn!(run_id = %report.run_id, error = %err, "synthesis failed");
                    report
                        .failures
                        .push(FailureRecord::from_error(RunStage::Synthesis, &err));
                }
            }
        }

        report.status = match (&report.synthesis, execution.is_success()) {
            (Some(_), true) => RunStatus::Succeeded,
            (Some(_), false) => RunStatus::PartiallySucceeded,
            (None, _) => RunStatus::Failed,
        };
        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            status = %report.status,
            failures = report.failures.len(),
            "objective run finished"
        );
        report
    }
}

/// Failed and Blocked tasks as attributed failure records.
fn task_failures(execution: &ExecutionReport) -> Vec<FailureRecord> {
    execution
        .outcomes
        .iter()
        .filter_map(|outcome| match outcome.status {
            TaskStatus::Failed => {
                let failure = outcome.error.clone()?;
                Some(FailureRecord {
                    stage: RunStage::Task,
                    task_id: Some(outcome.id.clone()),
                    kind: failure.kind,
                    message: failure.message,
                })
            }
            TaskStatus::Blocked => {
                let cause = outcome.blocked_by.clone().unwrap_or_default();
                let kind = execution
                    .get(&cause)
                    .and_then(|c| c.error.as_ref())
                    .map(|f| f.kind)
                    .unwrap_or(ErrorKind::Model);
                Some(FailureRecord {
                    stage: RunStage::Task,
                    task_id: Some(outcome.id.clone()),
                    kind,
                    message: format!("blocked by failed task '{cause}'"),
                })
            }
            _ => None,
        })
        .collect()
}
