//! Refinement state machine.
//!
//! ```text
//! Drafting → Reviewing ─gate─▶ Done
//!               ▲   │
//!               │   ├─fail, rounds left─▶ Refining ─┐
//!               │   │                        │      │
//!               └───┼────────────────────────┼──────┘
//!                   │                  refiner error
//!                   │                        ▼
//!                   └─fail, last round─▶ DoneWithWarnings
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{CritiqueReport, Section};
use crate::error::OrchestrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    Drafting,
    Reviewing,
    Refining,
    /// Gate passed.
    Done,
    /// Round budget spent without passing the gate.
    DoneWithWarnings,
}

impl RefinementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::DoneWithWarnings)
    }

    pub fn valid_transitions(self) -> &'static [RefinementStatus] {
        match self {
            Self::Drafting => &[Self::Reviewing],
            Self::Reviewing => &[Self::Done, Self::Refining, Self::DoneWithWarnings],
            Self::Refining => &[Self::Reviewing, Self::DoneWithWarnings],
            Self::Done | Self::DoneWithWarnings => &[],
        }
    }
}

impl fmt::Display for RefinementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drafting => write!(f, "drafting"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Refining => write!(f, "refining"),
            Self::Done => write!(f, "done"),
            Self::DoneWithWarnings => write!(f, "done_with_warnings"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: RefinementStatus,
    pub to: RefinementStatus,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Working state of one refinement run, owned by the loop driving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementState {
    /// Current round (1-indexed once reviewing starts).
    pub round: u32,
    pub max_rounds: u32,
    pub sections: Vec<Section>,
    /// Reports of the most recent review.
    pub reports: Vec<CritiqueReport>,
    pub status: RefinementStatus,
    pub transitions: Vec<StatusTransition>,
}

impl RefinementState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            round: 0,
            max_rounds,
            sections: Vec::new(),
            reports: Vec::new(),
            status: RefinementStatus::Drafting,
            transitions: Vec::new(),
        }
    }

    pub fn rounds_remaining(&self) -> u32 {
        self.max_rounds.saturating_sub(self.round)
    }

    /// Move to `to`, recording why. Entering Reviewing starts a new round.
    pub fn transition(&mut self, to: RefinementStatus, reason: &str) -> Result<(), OrchestrationError> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(OrchestrationError::Validation(format!(
                "invalid refinement transition {} → {}",
                self.status, to
            )));
        }
        if to == RefinementStatus::Reviewing {
            self.round += 1;
        }
        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            round: self.round,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.status = to;
        Ok(())
    }
}
