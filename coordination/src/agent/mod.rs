//! Agents — role tags, invocation contract, and the model-backed adapter.
//!
//! An agent is read-only configuration for the duration of a run: a stable
//! id, a [`Role`], persona text, and an async `invoke` capability. Roles are a
//! closed set resolved through an explicit [`AgentRegistry`] value built per
//! run; there is no global agent table.

pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, OrchestrationResult};

pub use registry::{AgentRegistry, AgentRegistryBuilder};

/// Role tag an agent fulfils.
///
/// Serializes as snake_case; deserializes through [`FromStr`], so any casing
/// a planner emits is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Role {
    /// Plans work, delegates, and synthesizes results.
    Coordinator,
    /// Gathers information and findings.
    Researcher,
    /// Analyzes data and draws conclusions.
    Analyst,
    /// Produces structured prose.
    Writer,
    /// Reviews content and reports issues.
    Reviewer,
    /// Revises drafts against critique.
    Editor,
    /// Software implementation work.
    Developer,
    /// User-experience and visual design work.
    Designer,
}

impl Role {
    pub fn all() -> &'static [Role] {
        &[
            Role::Coordinator,
            Role::Researcher,
            Role::Analyst,
            Role::Writer,
            Role::Reviewer,
            Role::Editor,
            Role::Developer,
            Role::Designer,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Researcher => "researcher",
            Self::Analyst => "analyst",
            Self::Writer => "writer",
            Self::Reviewer => "reviewer",
            Self::Editor => "editor",
            Self::Developer => "developer",
            Self::Designer => "designer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::all()
            .iter()
            .copied()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| OrchestrationError::Validation(format!("unknown role '{}'", s.trim())))
    }
}

impl TryFrom<String> for Role {
    type Error = OrchestrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One piece of upstream material handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Where the content came from (task id, agent id, reviewer name).
    pub source: String,
    pub content: String,
}

/// Everything an agent sees for a single invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    /// What the agent is asked to do.
    pub instruction: String,
    /// Shared background for the whole run (usually the objective).
    pub brief: Option<String>,
    /// Persona text of the invoked agent, filled in by [`ModelAgent`].
    pub persona: Option<String>,
    /// Upstream results in a stable order.
    pub inputs: Vec<ContextEntry>,
}

impl AgentContext {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn with_input(mut self, source: impl Into<String>, content: impl Into<String>) -> Self {
        self.inputs.push(ContextEntry {
            source: source.into(),
            content: content.into(),
        });
        self
    }

    /// Plain-text rendering for backends that take a single prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(persona) = &self.persona {
            out.push_str(persona);
            out.push_str("\n\n");
        }
        if let Some(brief) = &self.brief {
            out.push_str("Objective: ");
            out.push_str(brief);
            out.push_str("\n\n");
        }
        out.push_str("Task: ");
        out.push_str(&self.instruction);
        if !self.inputs.is_empty() {
            out.push_str("\n\nContext:");
            for entry in &self.inputs {
                out.push_str(&format!("\n\n[{}]\n{}", entry.source, entry.content));
            }
        }
        out
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Text content.
    pub content: String,
    /// Structured payload, when the backend produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl AgentOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            structured: Some(value),
        }
    }
}

/// An invocable agent capability.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier (used for attribution in reports and positions).
    fn id(&self) -> &str;

    fn role(&self) -> Role;

    /// Persona / standing instructions.
    fn persona(&self) -> &str {
        ""
    }

    async fn invoke(&self, context: AgentContext) -> OrchestrationResult<AgentOutput>;
}

/// Shared handle to an agent.
pub type SharedAgent = Arc<dyn Agent>;

/// Narrow contract to a language-model backend.
///
/// Implementations map backend failures to [`OrchestrationError::Model`] and
/// deadline expiry to [`OrchestrationError::Timeout`].
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, role: Role, context: &AgentContext) -> OrchestrationResult<AgentOutput>;
}

/// An [`Agent`] backed by a [`ModelInvoker`].
pub struct ModelAgent {
    id: String,
    role: Role,
    persona: String,
    invoker: Arc<dyn ModelInvoker>,
}

impl ModelAgent {
    pub fn new(id: impl Into<String>, role: Role, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            id: id.into(),
            role,
            persona: String::new(),
            invoker,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn shared(self) -> SharedAgent {
        Arc::new(self)
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn persona(&self) -> &str {
        &self.persona
    }

    async fn invoke(&self, mut context: AgentContext) -> OrchestrationResult<AgentOutput> {
        if !self.persona.is_empty() {
            context.persona = Some(self.persona.clone());
        }
        tracing::debug!(agent = %self.id, role = %self.role, "invoking model");
        self.invoker.invoke(self.role, &context).await
    }
}
