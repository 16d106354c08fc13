//! Debate transcript types: positions and the synthesized consensus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One agent's stance in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub agent_id: String,
    /// Zero-based round number.
    pub round: u32,
    pub stance: String,
    pub recorded_at: DateTime<Utc>,
}

impl Position {
    pub fn new(agent_id: impl Into<String>, round: u32, stance: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            round,
            stance: stance.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// What a consensus synthesizer returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusDraft {
    #[serde(alias = "consensus")]
    pub text: String,
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
}

/// Outcome of a debate: synthesized text plus every contributing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub topic: String,
    pub text: String,
    pub agreements: Vec<String>,
    pub disagreements: Vec<String>,
    /// All positions, ordered by round then participant registration order.
    pub positions: Vec<Position>,
    pub rounds: u32,
    pub participants: Vec<String>,
}

impl Consensus {
    pub fn positions_in_round(&self, round: u32) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(move |p| p.round == round)
    }

    pub fn positions_of<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Position> {
        self.positions.iter().filter(move |p| p.agent_id == agent_id)
    }

    pub fn is_unanimous(&self) -> bool {
        self.disagreements.is_empty()
    }
}
