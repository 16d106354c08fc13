//! Task dependency graph and scheduler.
//!
//! A [`TaskGraph`] is built from planner output, validated as a DAG, and then
//! driven to completion by a [`Scheduler`]. The scheduler is the only writer
//! of task state while a run is in progress.
//!
//! ```text
//! TaskSpec[] ──build──▶ TaskGraph ──validate──▶ Scheduler::execute
//!                                                  │
//!                 ┌────────── frontier ◀───────────┤
//!                 ▼                                │
//!        fan-out (≤ max_concurrency) ──fan-in──▶ apply results
//!                                                  │ failure
//!                                                  ▼
//!                                      block transitive dependents
//! ```

pub mod scheduler;
pub mod task;

use std::collections::{HashMap, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::agent::Role;
use crate::error::{GraphError, OrchestrationError, OrchestrationResult, TaskFailure};

pub use scheduler::{ExecutionReport, Scheduler, TaskOutcome};
pub use task::{Task, TaskId, TaskSpec, TaskStatus};

/// Directed acyclic graph of tasks, kept in declaration order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    brief: Option<String>,
}

impl TaskGraph {
    /// Build and validate a graph from ordered task descriptors.
    pub fn build(specs: Vec<TaskSpec>) -> OrchestrationResult<Self> {
        let mut tasks = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            if spec.id.trim().is_empty() {
                return Err(OrchestrationError::Validation(
                    "task id must not be empty".to_string(),
                ));
            }
            if index.contains_key(&spec.id) {
                return Err(GraphError::DuplicateTask(spec.id).into());
            }
            index.insert(spec.id.clone(), tasks.len());
            tasks.push(Task::from_spec(spec));
        }
        let graph = Self {
            tasks,
            index,
            brief: None,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Attach shared background passed to every task.
    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn brief(&self) -> Option<&str> {
        self.brief.as_deref()
    }

    /// Check that every dependency exists and the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::DanglingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let mut dag: DiGraph<usize, ()> = DiGraph::with_capacity(self.tasks.len(), 0);
        let nodes: Vec<NodeIndex> = (0..self.tasks.len()).map(|i| dag.add_node(i)).collect();
        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                dag.add_edge(nodes[self.index[dep]], nodes[i], ());
            }
        }
        toposort(&dag, None).map(|_| ()).map_err(|cycle| GraphError::Cycle {
            task: self.tasks[dag[cycle.node_id()]].id.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.tasks.iter().map(|t| t.role)
    }

    /// Pending tasks whose dependencies are all Completed, in declaration order.
    pub fn frontier(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn pending(&self) -> Vec<TaskId> {
        self.ids_with(TaskStatus::Pending)
    }

    pub fn ids_with(&self, status: TaskStatus) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }

    /// Results of the direct dependencies of `id`, in declaration order.
    pub fn dependency_results(&self, id: &str) -> Vec<(TaskId, String)> {
        let Some(task) = self.get(id) else {
            return Vec::new();
        };
        self.tasks
            .iter()
            .filter(|t| task.dependencies.contains(&t.id))
            .filter_map(|t| t.result.clone().map(|r| (t.id.clone(), r)))
            .collect()
    }

    // ── Scheduler-only mutation ────────────────────────────────────────────

    pub(crate) fn transition(&mut self, id: &str, to: TaskStatus) -> OrchestrationResult<()> {
        let task = self.task_mut(id)?;
        if !task.status.can_transition_to(to) {
            return Err(OrchestrationError::Validation(format!(
                "task '{}' cannot move from {} to {}",
                id, task.status, to
            )));
        }
        task.status = to;
        Ok(())
    }

    pub(crate) fn set_input(&mut self, id: &str, input: String) -> OrchestrationResult<()> {
        self.task_mut(id)?.input = Some(input);
        Ok(())
    }

    pub(crate) fn complete(&mut self, id: &str, result: String) -> OrchestrationResult<()> {
        self.transition(id, TaskStatus::Completed)?;
        self.task_mut(id)?.result = Some(result);
        Ok(())
    }

    /// Mark `id` Failed and block every transitive dependent that is still
    /// Pending. Returns the ids that were blocked.
    pub(crate) fn fail(&mut self, id: &str, failure: TaskFailure) -> OrchestrationResult<Vec<TaskId>> {
        self.transition(id, TaskStatus::Failed)?;
        self.task_mut(id)?.error = Some(failure);

        let mut blocked = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            let dependents: Vec<usize> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.status == TaskStatus::Pending && t.dependencies.contains(&current))
                .map(|(i, _)| i)
                .collect();
            for i in dependents {
                let task = &mut self.tasks[i];
                task.status = TaskStatus::Blocked;
                task.blocked_by = Some(id.to_string());
                blocked.push(task.id.clone());
                queue.push_back(task.id.clone());
            }
        }
        Ok(blocked)
    }

    fn task_mut(&mut self, id: &str) -> OrchestrationResult<&mut Task> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(OrchestrationError::Validation(format!("unknown task '{id}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        let mut s = TaskSpec::new(id, format!("do {id}"), Role::Researcher);
        for d in deps {
            s = s.depends_on(*d);
        }
        s
    }

    fn failure() -> TaskFailure {
        TaskFailure {
            kind: ErrorKind::Model,
            message: "backend down".to_string(),
        }
    }

    #[test]
    fn test_build_linear_chain() {
        let graph = TaskGraph::build(vec![
            spec("research", &[]),
            spec("analyze", &["research"]),
            spec("write", &["analyze"]),
        ])
        .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.frontier(), vec!["research"]);
    }

    #[test]
    fn test_cycle_detected() {
        let err = TaskGraph::build(vec![
            spec("a", &["c"]),
            spec("b", &["a"]),
            spec("c", &["b"]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::UnresolvableGraph(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = TaskGraph::build(vec![spec("a", &["a"])]).unwrap_err();
        match err {
            OrchestrationError::UnresolvableGraph(GraphError::Cycle { task }) => {
                assert_eq!(task, "a")
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_dependency() {
        let err = TaskGraph::build(vec![spec("a", &[]), spec("b", &["ghost"])]).unwrap_err();
        match err {
            OrchestrationError::UnresolvableGraph(GraphError::DanglingDependency {
                task,
                missing,
            }) => {
                assert_eq!(task, "b");
                assert_eq!(missing, "ghost");
            }
            other => panic!("expected dangling dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = TaskGraph::build(vec![spec("a", &[]), spec("a", &[])]).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::UnresolvableGraph(GraphError::DuplicateTask(ref id)) if id == "a"
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = TaskGraph::build(vec![spec(" ", &[])]).unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn test_frontier_waits_for_all_dependencies() {
        let mut graph = TaskGraph::build(vec![
            spec("a", &[]),
            spec("b", &[]),
            spec("c", &["a", "b"]),
        ])
        .unwrap();
        assert_eq!(graph.frontier(), vec!["a", "b"]);

        graph.transition("a", TaskStatus::Ready).unwrap();
        graph.transition("a", TaskStatus::Running).unwrap();
        graph.complete("a", "A".into()).unwrap();
        assert_eq!(graph.frontier(), vec!["b"]);

        graph.transition("b", TaskStatus::Ready).unwrap();
        graph.transition("b", TaskStatus::Running).unwrap();
        graph.complete("b", "B".into()).unwrap();
        assert_eq!(graph.frontier(), vec!["c"]);
        assert_eq!(
            graph.dependency_results("c"),
            vec![("a".to_string(), "A".to_string()), ("b".to_string(), "B".to_string())]
        );
    }

    #[test]
    fn test_failure_blocks_transitive_dependents_only() {
        let mut graph = TaskGraph::build(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["b"]),
            spec("d", &[]),
        ])
        .unwrap();
        graph.transition("a", TaskStatus::Ready).unwrap();
        graph.transition("a", TaskStatus::Running).unwrap();
        let blocked = graph.fail("a", failure()).unwrap();

        assert_eq!(blocked, vec!["b", "c"]);
        assert_eq!(graph.status_of("c"), Some(TaskStatus::Blocked));
        assert_eq!(graph.get("c").unwrap().blocked_by.as_deref(), Some("a"));
        assert_eq!(graph.status_of("d"), Some(TaskStatus::Pending));
        assert_eq!(graph.frontier(), vec!["d"]);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut graph = TaskGraph::build(vec![spec("a", &[])]).unwrap();
        assert!(graph.transition("a", TaskStatus::Completed).is_err());
        assert!(graph.transition("missing", TaskStatus::Ready).is_err());
    }
}
