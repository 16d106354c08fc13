//! Agent registry — role tag → agent capability, fixed for a run.
//!
//! The registry is built once through [`AgentRegistryBuilder`] and exposes no
//! mutation afterwards, so agents cannot be swapped while a run is in flight.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Role, SharedAgent};
use crate::error::{OrchestrationError, OrchestrationResult};

/// Immutable mapping from [`Role`] to the agent serving it.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<BTreeMap<Role, SharedAgent>>,
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    /// Resolve the agent for `role`.
    pub fn resolve(&self, role: Role) -> OrchestrationResult<SharedAgent> {
        self.agents
            .get(&role)
            .cloned()
            .ok_or(OrchestrationError::NoWorkerForRole(role))
    }

    pub fn contains(&self, role: Role) -> bool {
        self.agents.contains_key(&role)
    }

    /// Check every role up front; fails on the first unregistered one.
    pub fn ensure_roles<I>(&self, roles: I) -> OrchestrationResult<()>
    where
        I: IntoIterator<Item = Role>,
    {
        for role in roles {
            if !self.contains(role) {
                return Err(OrchestrationError::NoWorkerForRole(role));
            }
        }
        Ok(())
    }

    pub fn roles(&self) -> Vec<Role> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<(Role, &str)> = self
            .agents
            .iter()
            .map(|(role, agent)| (*role, agent.id()))
            .collect();
        f.debug_struct("AgentRegistry")
            .field("agents", &entries)
            .finish()
    }
}

/// Collects agents before a run starts.
#[derive(Default)]
pub struct AgentRegistryBuilder {
    agents: BTreeMap<Role, SharedAgent>,
}

impl AgentRegistryBuilder {
    /// Register `agent` under its own role. A later registration for the same
    /// role replaces the earlier one.
    pub fn agent(mut self, agent: SharedAgent) -> Self {
        self.insert(agent.role(), agent);
        self
    }

    /// Register `agent` under an explicit role.
    pub fn agent_for(mut self, role: Role, agent: SharedAgent) -> Self {
        self.insert(role, agent);
        self
    }

    pub fn insert(&mut self, role: Role, agent: SharedAgent) {
        if let Some(previous) = self.agents.insert(role, agent) {
            tracing::warn!(role = %role, replaced = %previous.id(), "agent registration replaced");
        }
    }

    pub fn build(self) -> AgentRegistry {
        AgentRegistry {
            agents: Arc::new(self.agents),
        }
    }

    /// Freeze the current registrations without consuming the builder.
    pub fn snapshot(&self) -> AgentRegistry {
        AgentRegistry {
            agents: Arc::new(self.agents.clone()),
        }
    }
}
