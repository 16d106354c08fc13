//! Frontier scheduler — bounded fan-out / fan-in over a [`TaskGraph`].
//!
//! Each scheduler round:
//!
//! 1. compute the frontier (Pending tasks whose dependencies are Completed)
//! 2. mark it Ready and spawn every member onto a `JoinSet`, gated by a
//!    semaphore of `max_concurrency` permits
//! 3. wait for the whole frontier (fan-in barrier); a worker reports back
//!    over a channel once it holds a permit, and only then is its task
//!    marked Running
//! 4. apply results: Completed, or Failed plus Blocked for every transitive
//!    dependent
//!
//! Workers never touch the graph. They return `(task id, result)` and the
//! scheduler loop, the single writer, applies it, so a dependent only ever
//! reads results of tasks that are already Completed.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TaskGraph, TaskId, TaskStatus};
use crate::agent::{AgentContext, AgentOutput, AgentRegistry, Role};
use crate::config::SchedulerConfig;
use crate::error::{
    with_deadline, ErrorKind, GraphError, OrchestrationError, OrchestrationResult, TaskFailure,
};

/// Final state of one task after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub role: Role,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<TaskFailure>,
    pub blocked_by: Option<TaskId>,
}

/// Result of driving a graph to completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Outcomes in graph declaration order.
    pub outcomes: Vec<TaskOutcome>,
    /// Task ids dispatched in each scheduler round.
    pub rounds: Vec<Vec<TaskId>>,
    /// Most tasks observed Running at the same time.
    #[serde(default)]
    pub peak_running: usize,
}

impl ExecutionReport {
    fn from_graph(graph: &TaskGraph, rounds: Vec<Vec<TaskId>>, peak_running: usize) -> Self {
        let outcomes = graph
            .tasks()
            .iter()
            .map(|t| TaskOutcome {
                id: t.id.clone(),
                role: t.role,
                status: t.status,
                result: t.result.clone(),
                error: t.error.clone(),
                blocked_by: t.blocked_by.clone(),
            })
            .collect();
        Self {
            outcomes,
            rounds,
            peak_running,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    /// `(id, result)` of every Completed task, in declaration order.
    pub fn results(&self) -> Vec<(TaskId, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.clone().map(|r| (o.id.clone(), r)))
            .collect()
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| o.status == status).collect()
    }

    pub fn completed_count(&self) -> usize {
        self.with_status(TaskStatus::Completed).len()
    }

    /// True when every task completed.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == TaskStatus::Completed)
    }
}

/// Executes task graphs against an [`AgentRegistry`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive `graph` until no task can make progress.
    ///
    /// Structural problems (cycle, dangling dependency, unregistered role)
    /// fail before anything is dispatched. Task failures are recorded on the
    /// graph and never abort the run.
    pub async fn execute(
        &self,
        graph: &mut TaskGraph,
        registry: &AgentRegistry,
    ) -> OrchestrationResult<ExecutionReport> {
        graph.validate()?;
        registry.ensure_roles(graph.roles())?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let deadline = self.config.task_timeout();
        let mut rounds: Vec<Vec<TaskId>> = Vec::new();
        let mut peak_running = 0;

        info!(
            tasks = graph.len(),
            max_concurrency = self.config.max_concurrency,
            "scheduler started"
        );

        loop {
            let frontier = graph.frontier();
            if frontier.is_empty() {
                let pending = graph.pending();
                if pending.is_empty() {
                    break;
                }
                return Err(GraphError::Deadlock { pending }.into());
            }

            let round = rounds.len() + 1;
            debug!(round, frontier = ?frontier, "dispatching frontier");

            let mut join_set: JoinSet<(TaskId, OrchestrationResult<AgentOutput>)> = JoinSet::new();
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<Progress>();
            for id in &frontier {
                graph.transition(id, TaskStatus::Ready)?;
                let context = context_for(graph, id)?;
                graph.set_input(id, context.render())?;
                let role = graph.get(id).map(|t| t.role).ok_or_else(|| {
                    OrchestrationError::Validation(format!("unknown task '{id}'"))
                })?;
                let agent = registry.resolve(role)?;

                let progress = progress_tx.clone();
                let sem = semaphore.clone();
                let cancel = self.cancel.clone();
                let task_id = id.clone();
                join_set.spawn(async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let err = OrchestrationError::Cancelled("scheduler closed".to_string());
                            return (task_id, Err(err));
                        }
                    };
                    // The receiver lives until the whole frontier has joined.
                    let _ = progress.send(Progress::Started(task_id.clone()));
                    let operation = format!("task '{task_id}'");
                    let invocation = AssertUnwindSafe(with_deadline(
                        deadline,
                        &operation,
                        agent.invoke(context),
                    ))
                    .catch_unwind();
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(OrchestrationError::Cancelled(
                            format!("{operation} cancelled"),
                        )),
                        outcome = invocation => match outcome {
                            Ok(result) => result,
                            Err(_) => Err(OrchestrationError::Model(format!(
                                "agent '{}' panicked",
                                agent.id()
                            ))),
                        },
                    };
                    // Sent while the permit is still held.
                    let _ = progress.send(Progress::Finished(task_id.clone()));
                    (task_id, result)
                });
            }

            drop(progress_tx);

            // Fan-in barrier: the next frontier is computed only after every
            // member of this one has settled. Progress notices are sent
            // before their worker returns, so `biased` drains them first.
            let mut settled: Vec<(TaskId, OrchestrationResult<AgentOutput>)> =
                Vec::with_capacity(frontier.len());
            let mut running: HashSet<TaskId> = HashSet::new();
            loop {
                tokio::select! {
                    biased;
                    Some(notice) = progress_rx.recv() => match notice {
                        Progress::Started(id) => {
                            graph.transition(&id, TaskStatus::Running)?;
                            debug!(round, task_id = %id, "task running");
                            running.insert(id);
                            peak_running = peak_running.max(running.len());
                        }
                        Progress::Finished(id) => {
                            running.remove(&id);
                        }
                    },
                    joined = join_set.join_next() => match joined {
                        Some(Ok(pair)) => settled.push(pair),
                        Some(Err(e)) => warn!(error = %e, "scheduler worker aborted"),
                        None => break,
                    },
                }
            }

            for (id, result) in settled {
                match result {
                    Ok(output) => {
                        info!(round, task_id = %id, "task completed");
                        graph.complete(&id, output.content)?;
                    }
                    Err(err) => self.record_failure(graph, &id, TaskFailure::from(&err))?,
                }
            }

            // A worker whose join failed never reported back.
            for id in &frontier {
                if matches!(
                    graph.status_of(id),
                    Some(TaskStatus::Ready | TaskStatus::Running)
                ) {
                    let failure = TaskFailure {
                        kind: ErrorKind::Model,
                        message: format!("worker for task '{id}' did not report a result"),
                    };
                    self.record_failure(graph, id, failure)?;
                }
            }

            rounds.push(frontier);
        }

        let report = ExecutionReport::from_graph(graph, rounds, peak_running);
        info!(
            rounds = report.rounds.len(),
            completed = report.completed_count(),
            failed = report.with_status(TaskStatus::Failed).len(),
            blocked = report.with_status(TaskStatus::Blocked).len(),
            "scheduler finished"
        );
        Ok(report)
    }

    fn record_failure(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        failure: TaskFailure,
    ) -> OrchestrationResult<()> {
        warn!(task_id = %id, error = %failure, "task failed");
        let blocked = graph.fail(id, failure)?;
        if !blocked.is_empty() {
            warn!(task_id = %id, blocked = ?blocked, "dependents blocked");
        }
        Ok(())
    }
}

/// Worker notices, in the order they happened.
enum Progress {
    /// Holds a permit and is about to invoke its agent.
    Started(TaskId),
    /// Done invoking; the permit is released right after.
    Finished(TaskId),
}

/// Build the invocation context: brief plus direct dependency results.
fn context_for(graph: &TaskGraph, id: &str) -> OrchestrationResult<AgentContext> {
    let task = graph
        .get(id)
        .ok_or_else(|| OrchestrationError::Validation(format!("unknown task '{id}'")))?;
    let mut context = AgentContext::new(task.description.clone());
    if let Some(brief) = graph.brief() {
        context = context.with_brief(brief);
    }
    for (dep, result) in graph.dependency_results(id) {
        context = context.with_input(dep, result);
    }
    Ok(context)
}
