//! Deterministic mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_coordination::{
    Agent, AgentContext, AgentOutput, OrchestrationError, OrchestrationResult, Role, SharedAgent,
};
use async_trait::async_trait;

/// Start/finish events in the order the runtime observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    Finish(String),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(id) => Some(id),
                Event::Finish(_) => None,
            })
            .collect()
    }
}

/// Agent that logs each task instruction, waits, then answers or fails.
pub struct ScriptedAgent {
    pub id: String,
    pub role: Role,
    pub delay: Duration,
    pub fail_on: Vec<String>,
    pub log: Arc<EventLog>,
    pub calls: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(id: &str, role: Role, log: Arc<EventLog>) -> Self {
        Self {
            id: id.to_string(),
            role,
            delay: Duration::from_millis(5),
            fail_on: Vec::new(),
            log,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, instruction: &str) -> Self {
        self.fail_on.push(instruction.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn invoke(&self, context: AgentContext) -> OrchestrationResult<AgentOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let task = context.instruction.clone();
        self.log.push(Event::Start(task.clone()));
        tokio::time::sleep(self.delay).await;
        self.log.push(Event::Finish(task.clone()));
        if self.fail_on.contains(&task) {
            return Err(OrchestrationError::Model(format!("{} backend error on {task}", self.id)));
        }
        let upstream: Vec<&str> = context.inputs.iter().map(|i| i.source.as_str()).collect();
        Ok(AgentOutput::text(format!(
            "{}({}) <- [{}]",
            self.role,
            task,
            upstream.join(",")
        )))
    }
}

pub fn shared(agent: ScriptedAgent) -> (Arc<ScriptedAgent>, SharedAgent) {
    let agent = Arc::new(agent);
    let dyn_agent: SharedAgent = agent.clone();
    (agent, dyn_agent)
}
