//! Multi-agent debate — fixed-round peer position exchange.
//!
//! ```text
//! round 0      A₀   B₀   C₀        independent, parallel, no peer visibility
//!               ╲   │   ╱
//! round 1      A₁   B₁   C₁        each sees every round-0 position
//!               ╲   │   ╱
//!  ...
//!                   ▼
//!      ConsensusSynthesizer(all N×R positions)
//!                   ▼
//!      Consensus { text, agreements, disagreements, positions }
//! ```
//!
//! Termination is the round count alone; there is no convergence check.

pub mod transcript;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgentContext, SharedAgent};
use crate::config::DebateConfig;
use crate::error::{with_deadline, OrchestrationError, OrchestrationResult};

pub use transcript::{Consensus, ConsensusDraft, Position};

const OPENING_INSTRUCTION: &str = "State your position on the topic.";
const REBUTTAL_INSTRUCTION: &str =
    "Consider the positions from the previous round and state your updated position.";

/// Produces a consensus that names agreements and disagreements.
#[async_trait]
pub trait ConsensusSynthesizer: Send + Sync {
    async fn synthesize(&self, topic: &str, positions: &[Position])
        -> OrchestrationResult<ConsensusDraft>;
}

/// [`ConsensusSynthesizer`] backed by an agent answering with JSON
/// `{"text": .., "agreements": [..], "disagreements": [..]}`.
pub struct AgentConsensusSynthesizer {
    agent: SharedAgent,
}

impl AgentConsensusSynthesizer {
    pub fn new(agent: SharedAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ConsensusSynthesizer for AgentConsensusSynthesizer {
    async fn synthesize(
        &self,
        topic: &str,
        positions: &[Position],
    ) -> OrchestrationResult<ConsensusDraft> {
        let mut context = AgentContext::new(
            "Synthesize a consensus. Answer with JSON: \
             {\"text\": str, \"agreements\": [str], \"disagreements\": [str]}",
        )
        .with_brief(topic);
        for p in positions {
            context = context.with_input(format!("{} / round {}", p.agent_id, p.round), p.stance.clone());
        }
        let output = self.agent.invoke(context).await?;
        let draft = match output.structured {
            Some(value) => serde_json::from_value(value),
            None => serde_json::from_str(output.content.trim()),
        };
        draft.map_err(|e| OrchestrationError::Model(format!("unreadable consensus: {e}")))
    }
}

/// Runs debates between registered participants.
pub struct DebateCoordinator {
    participants: Vec<SharedAgent>,
    synthesizer: Arc<dyn ConsensusSynthesizer>,
    default_rounds: u32,
    call_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl DebateCoordinator {
    pub fn new(synthesizer: Arc<dyn ConsensusSynthesizer>) -> Self {
        let config = DebateConfig::default();
        Self {
            participants: Vec::new(),
            synthesizer,
            default_rounds: config.rounds,
            call_timeout: config.call_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: &DebateConfig) -> Self {
        self.default_rounds = config.rounds;
        self.call_timeout = config.call_timeout();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Register a participant. Ids must be unique; positions are keyed by them.
    pub fn add_agent(&mut self, agent: SharedAgent) -> OrchestrationResult<()> {
        if self.participants.iter().any(|a| a.id() == agent.id()) {
            return Err(OrchestrationError::Validation(format!(
                "debate participant '{}' already registered",
                agent.id()
            )));
        }
        self.participants.push(agent);
        Ok(())
    }

    pub fn participants(&self) -> Vec<&str> {
        self.participants.iter().map(|a| a.id()).collect()
    }

    /// Debate with the configured round count.
    pub async fn conduct(&self, topic: &str) -> OrchestrationResult<Consensus> {
        self.conduct_debate(topic, self.default_rounds).await
    }

    /// Run exactly `rounds` rounds, then synthesize one consensus.
    pub async fn conduct_debate(&self, topic: &str, rounds: u32) -> OrchestrationResult<Consensus> {
        if rounds == 0 {
            return Err(OrchestrationError::Validation(
                "a debate needs at least one round".to_string(),
            ));
        }
        if self.participants.is_empty() {
            return Err(OrchestrationError::Validation(
                "a debate needs at least one participant".to_string(),
            ));
        }
        if topic.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "debate topic must not be empty".to_string(),
            ));
        }

        info!(participants = self.participants.len(), rounds, "debate started");
        let mut positions: Vec<Position> = Vec::new();
        let mut previous: Vec<Position> = Vec::new();

        for round in 0..rounds {
            if self.cancel.is_cancelled() {
                return Err(OrchestrationError::Cancelled(format!(
                    "debate cancelled before round {round}"
                )));
            }
            let current = self.run_round(topic, round, &previous).await?;
            debug!(round, positions = current.len(), "debate round complete");
            positions.extend(current.iter().cloned());
            previous = current;
        }

        let draft = self.synthesizer.synthesize(topic, &positions).await?;
        info!(
            agreements = draft.agreements.len(),
            disagreements = draft.disagreements.len(),
            "consensus synthesized"
        );
        Ok(Consensus {
            topic: topic.to_string(),
            text: draft.text,
            agreements: draft.agreements,
            disagreements: draft.disagreements,
            positions,
            rounds,
            participants: self.participants.iter().map(|a| a.id().to_string()).collect(),
        })
    }

    async fn run_round(
        &self,
        topic: &str,
        round: u32,
        previous: &[Position],
    ) -> OrchestrationResult<Vec<Position>> {
        let instruction = if round == 0 {
            OPENING_INSTRUCTION
        } else {
            REBUTTAL_INSTRUCTION
        };
        let mut context = AgentContext::new(instruction).with_brief(topic);
        for p in previous {
            context = context.with_input(p.agent_id.clone(), p.stance.clone());
        }

        let calls = self.participants.iter().map(|agent| {
            let context = context.clone();
            async move {
                let operation = format!("debate participant '{}' round {round}", agent.id());
                let result = with_deadline(self.call_timeout, &operation, agent.invoke(context)).await;
                (agent, result)
            }
        });

        let mut current = Vec::with_capacity(self.participants.len());
        for (agent, result) in join_all(calls).await {
            match result {
                Ok(output) => current.push(Position::new(agent.id(), round, output.content)),
                Err(err) => return Err(err.attributed(agent.id(), format!("round {round}"))),
            }
        }
        Ok(current)
    }
}
