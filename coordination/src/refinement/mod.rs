//! Bounded critique → gate → refine loop over a sectioned draft.
//!
//! Each round merges the current sections into one artifact, runs every
//! reviewer on it in parallel, and evaluates the [`QualityGate`]:
//!
//! | Gate   | Rounds left | Next                                   |
//! |--------|-------------|----------------------------------------|
//! | pass   | any         | `Done`                                 |
//! | fail   | yes         | `Refiner::refine`, then review again   |
//! | fail   | no          | `DoneWithWarnings` + unresolved reports |
//!
//! Rounds are strictly sequential. The refiner is called at most
//! `max_rounds - 1` times. A reviewer that errors or times out contributes a
//! `Fail` report naming the error, so nothing it would have flagged is lost.
//! A refiner failure also ends in `DoneWithWarnings`: the outcome keeps every
//! reviewed round and records the error in `refiner_failure`.

pub mod gate;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentContext, AgentOutput, SharedAgent};
use crate::config::RefinementConfig;
use crate::error::{with_deadline, OrchestrationError, OrchestrationResult, TaskFailure};

pub use gate::{GateDecision, QualityGate};
pub use state::{RefinementState, RefinementStatus, StatusTransition};
pub use types::{merge_sections, CritiqueReport, ReportStatus, Section};

/// What a reviewer sees for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewArtifact {
    pub round: u32,
    pub sections: Vec<Section>,
    /// Sections merged in declared order.
    pub merged: String,
}

/// Produces the initial draft.
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, brief: &str) -> OrchestrationResult<Vec<Section>>;
}

/// Independent reviewer; returns exactly one report per round.
#[async_trait]
pub trait Reviewer: Send + Sync {
    fn name(&self) -> &str;

    async fn review(&self, artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport>;
}

/// Produces a new draft from the current one and every report of the round.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(
        &self,
        sections: &[Section],
        reports: &[CritiqueReport],
    ) -> OrchestrationResult<Vec<Section>>;
}

const REVIEW_INSTRUCTION: &str = "Review the draft. Answer with JSON: \
     {\"status\": \"ok\" | \"fail\", \"score\": number (optional, 0-100), \"detail\": str}";

#[derive(Deserialize)]
struct ReviewPayload {
    status: ReportStatus,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    detail: String,
}

/// [`Reviewer`] backed by an agent answering with a JSON verdict.
pub struct AgentReviewer {
    name: String,
    agent: SharedAgent,
    instruction: String,
}

impl AgentReviewer {
    pub fn new(name: impl Into<String>, agent: SharedAgent) -> Self {
        Self {
            name: name.into(),
            agent,
            instruction: REVIEW_INSTRUCTION.to_string(),
        }
    }

    /// Replace the default review instruction (e.g. a rubric).
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    fn parse(&self, output: AgentOutput) -> OrchestrationResult<CritiqueReport> {
        let payload: ReviewPayload = match output.structured {
            Some(value) => serde_json::from_value(value),
            None => serde_json::from_str(output.content.trim()),
        }
        .map_err(|e| {
            OrchestrationError::Model(format!("reviewer '{}' returned an unreadable verdict: {e}", self.name))
        })?;
        Ok(CritiqueReport {
            source: self.name.clone(),
            status: payload.status,
            score: payload.score,
            detail: payload.detail,
        })
    }
}

#[async_trait]
impl Reviewer for AgentReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport> {
        let context = AgentContext::new(self.instruction.clone())
            .with_input(format!("draft, round {}", artifact.round), artifact.merged.clone());
        let output = self.agent.invoke(context).await?;
        self.parse(output)
    }
}

/// Everything observed in one review round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub artifact: String,
    pub reports: Vec<CritiqueReport>,
    pub decision: GateDecision,
}

/// Final result of a refinement run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementOutcome {
    /// `Done` or `DoneWithWarnings`.
    pub status: RefinementStatus,
    /// Artifact of the last reviewed round.
    pub artifact: String,
    pub sections: Vec<Section>,
    pub rounds: u32,
    pub history: Vec<RoundRecord>,
    /// Reports of the last round that kept the gate closed.
    pub unresolved: Vec<CritiqueReport>,
    pub threshold: f64,
    /// Set when the refiner failed and the loop stopped early.
    #[serde(default)]
    pub refiner_failure: Option<TaskFailure>,
}

impl RefinementOutcome {
    pub fn passed(&self) -> bool {
        self.status == RefinementStatus::Done
    }

    /// Reports of the last round.
    pub fn final_reports(&self) -> &[CritiqueReport] {
        self.history
            .last()
            .map(|r| r.reports.as_slice())
            .unwrap_or_default()
    }

    /// Every report from every round, in round order.
    pub fn all_reports(&self) -> Vec<&CritiqueReport> {
        self.history.iter().flat_map(|r| r.reports.iter()).collect()
    }

    /// The non-fatal gate failure carried by a `DoneWithWarnings` outcome.
    pub fn gate_not_met(&self) -> Option<OrchestrationError> {
        if self.passed() {
            return None;
        }
        let decision = &self.history.last()?.decision;
        Some(OrchestrationError::GateNotMet {
            rounds: self.rounds,
            score: decision.score,
            threshold: self.threshold,
            failing: decision.failing.clone(),
        })
    }
}

/// Drives a draft through bounded review rounds.
pub struct RefinementLoop {
    drafter: Option<Arc<dyn Drafter>>,
    reviewers: Vec<Arc<dyn Reviewer>>,
    refiner: Arc<dyn Refiner>,
    gate: QualityGate,
    max_rounds: u32,
    reviewer_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl RefinementLoop {
    /// Loop with default settings (3 rounds, score ≥ 90 on `rubric`).
    pub fn new(refiner: Arc<dyn Refiner>) -> Self {
        let config = RefinementConfig::default();
        Self {
            drafter: None,
            reviewers: Vec::new(),
            refiner,
            gate: QualityGate::from_config(&config),
            max_rounds: config.max_rounds,
            reviewer_timeout: config.reviewer_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: &RefinementConfig) -> Self {
        self.gate = QualityGate::from_config(config);
        self.max_rounds = config.max_rounds;
        self.reviewer_timeout = config.reviewer_timeout();
        self
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn Drafter>) -> Self {
        self.drafter = Some(drafter);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewers.push(reviewer);
        self
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_reviewer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reviewer_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Draft from `brief`, then refine.
    pub async fn run(&self, brief: &str) -> OrchestrationResult<RefinementOutcome> {
        let drafter = self.drafter.as_ref().ok_or_else(|| {
            OrchestrationError::Validation("refinement loop has no drafter".to_string())
        })?;
        info!("drafting initial sections");
        let sections = drafter.draft(brief).await?;
        self.run_from(sections).await
    }

    /// Refine an existing draft.
    pub async fn run_from(&self, sections: Vec<Section>) -> OrchestrationResult<RefinementOutcome> {
        if self.max_rounds == 0 {
            return Err(OrchestrationError::Validation(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if self.reviewers.is_empty() {
            return Err(OrchestrationError::Validation(
                "refinement loop has no reviewers".to_string(),
            ));
        }
        if sections.is_empty() {
            return Err(OrchestrationError::Validation(
                "draft has no sections".to_string(),
            ));
        }

        let mut state = RefinementState::new(self.max_rounds);
        state.sections = sections;
        let mut history: Vec<RoundRecord> = Vec::new();

        loop {
            self.check_cancelled(state.round)?;
            state.transition(RefinementStatus::Reviewing, "draft ready for review")?;

            let artifact = ReviewArtifact {
                round: state.round,
                sections: state.sections.clone(),
                merged: merge_sections(&state.sections),
            };
            let reports = self.review(&artifact).await;
            let decision = self.gate.evaluate(&reports);
            info!(
                round = state.round,
                passed = decision.passed,
                score = ?decision.score,
                failing = ?decision.failing,
                "gate evaluated"
            );

            state.reports = reports.clone();
            history.push(RoundRecord {
                round: state.round,
                artifact: artifact.merged,
                reports,
                decision: decision.clone(),
            });

            if decision.passed {
                state.transition(RefinementStatus::Done, "gate passed")?;
                return Ok(self.finish(state, history, Vec::new()));
            }

            let unresolved = state
                .reports
                .iter()
                .filter(|r| decision.failing.contains(&r.source))
                .cloned()
                .collect::<Vec<_>>();

            if state.rounds_remaining() == 0 {
                state.transition(RefinementStatus::DoneWithWarnings, "round budget spent")?;
                warn!(
                    rounds = state.round,
                    unresolved = unresolved.len(),
                    "refinement finished without passing the gate"
                );
                return Ok(self.finish(state, history, unresolved));
            }

            state.transition(RefinementStatus::Refining, "gate not met")?;
            self.check_cancelled(state.round)?;
            match self.refine(&state).await {
                Ok(refined) => state.sections = refined,
                Err(err) => {
                    warn!(round = state.round, error = %err, "refiner failed; keeping reviewed rounds");
                    state.transition(RefinementStatus::DoneWithWarnings, "refiner failed")?;
                    let mut outcome = self.finish(state, history, unresolved);
                    outcome.refiner_failure = Some(TaskFailure::from(&err));
                    return Ok(outcome);
                }
            }
        }
    }

    async fn refine(&self, state: &RefinementState) -> OrchestrationResult<Vec<Section>> {
        let stage = format!("round {}", state.round);
        let refined = self
            .refiner
            .refine(&state.sections, &state.reports)
            .await
            .map_err(|e| e.attributed("refiner", stage.clone()))?;
        if refined.is_empty() {
            return Err(OrchestrationError::Validation(
                "refiner returned no sections".to_string(),
            )
            .attributed("refiner", stage));
        }
        Ok(refined)
    }

    async fn review(&self, artifact: &ReviewArtifact) -> Vec<CritiqueReport> {
        let calls = self.reviewers.iter().map(|reviewer| async move {
            let name = reviewer.name().to_string();
            let operation = format!("reviewer '{name}'");
            match with_deadline(self.reviewer_timeout, &operation, reviewer.review(artifact)).await
            {
                Ok(mut report) => {
                    if report.source.is_empty() {
                        report.source = name;
                    }
                    debug!(round = artifact.round, source = %report.source, status = %report.status, "review received");
                    report
                }
                Err(err) => {
                    warn!(round = artifact.round, reviewer = %name, error = %err, "reviewer failed");
                    CritiqueReport::fail(name, format!("reviewer error: {err}"))
                }
            }
        });
        join_all(calls).await
    }

    fn check_cancelled(&self, round: u32) -> OrchestrationResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled(format!(
                "refinement cancelled after round {round}"
            )));
        }
        Ok(())
    }

    fn finish(
        &self,
        state: RefinementState,
        history: Vec<RoundRecord>,
        unresolved: Vec<CritiqueReport>,
    ) -> RefinementOutcome {
        let artifact = history
            .last()
            .map(|r| r.artifact.clone())
            .unwrap_or_default();
        RefinementOutcome {
            status: state.status,
            artifact,
            sections: state.sections,
            rounds: state.round,
            history,
            unresolved,
            threshold: self.gate.threshold,
            refiner_failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Role};
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Rubric(f64);

    #[async_trait]
    impl Reviewer for Rubric {
        fn name(&self) -> &str {
            "rubric"
        }
        async fn review(&self, _artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport> {
            Ok(CritiqueReport::scored("rubric", self.0))
        }
    }

    struct Broken;

    #[async_trait]
    impl Reviewer for Broken {
        fn name(&self) -> &str {
            "facts"
        }
        async fn review(&self, _artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport> {
            Err(OrchestrationError::Model("search backend down".into()))
        }
    }

    #[derive(Default)]
    struct CountingRefiner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Refiner for CountingRefiner {
        async fn refine(
            &self,
            sections: &[Section],
            _reports: &[CritiqueReport],
        ) -> OrchestrationResult<Vec<Section>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(sections
                .iter()
                .map(|s| Section::new(s.id.clone(), s.order, format!("{} (rev {n})", s.body)))
                .collect())
        }
    }

    fn draft() -> Vec<Section> {
        vec![Section::new("intro", 1, "Hello.")]
    }

    #[tokio::test]
    async fn test_reviewer_error_becomes_fail_report() {
        let refiner = Arc::new(CountingRefiner::default());
        let outcome = RefinementLoop::new(refiner.clone())
            .with_reviewer(Arc::new(Rubric(95.0)))
            .with_reviewer(Arc::new(Broken))
            .with_max_rounds(2)
            .run_from(draft())
            .await
            .unwrap();

        assert_eq!(outcome.status, RefinementStatus::DoneWithWarnings);
        assert_eq!(refiner.calls.load(Ordering::SeqCst), 1);
        let facts = &outcome.unresolved[0];
        assert_eq!(facts.source, "facts");
        assert!(facts.detail.contains("search backend down"));
        assert_eq!(outcome.artifact, "## intro\n\nHello. (rev 1)");
        let warning = outcome.gate_not_met().unwrap();
        assert_eq!(warning.kind(), ErrorKind::GateNotMet);
    }

    struct FailingRefiner;

    #[async_trait]
    impl Refiner for FailingRefiner {
        async fn refine(
            &self,
            _sections: &[Section],
            _reports: &[CritiqueReport],
        ) -> OrchestrationResult<Vec<Section>> {
            Err(OrchestrationError::Model("refiner backend 503".into()))
        }
    }

    #[tokio::test]
    async fn test_refiner_error_keeps_reviewed_rounds() {
        let outcome = RefinementLoop::new(Arc::new(FailingRefiner))
            .with_reviewer(Arc::new(Rubric(10.0)))
            .with_max_rounds(3)
            .run_from(draft())
            .await
            .unwrap();

        assert_eq!(outcome.status, RefinementStatus::DoneWithWarnings);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.history[0].reports[0].score, Some(10.0));
        assert_eq!(outcome.artifact, "## intro\n\nHello.");
        assert_eq!(outcome.unresolved[0].source, "rubric");

        let failure = outcome.refiner_failure.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::Model);
        assert!(failure.message.contains("refiner"));
        assert!(failure.message.contains("round 1"));
        assert!(failure.message.contains("refiner backend 503"));
        assert!(outcome.gate_not_met().is_some());
    }

    #[tokio::test]
    async fn test_single_round_budget_never_refines() {
        let refiner = Arc::new(CountingRefiner::default());
        let outcome = RefinementLoop::new(refiner.clone())
            .with_reviewer(Arc::new(Rubric(10.0)))
            .with_max_rounds(1)
            .run_from(draft())
            .await
            .unwrap();
        assert_eq!(outcome.rounds, 1);
        assert_eq!(refiner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let refiner = Arc::new(CountingRefiner::default());
        let no_reviewers = RefinementLoop::new(refiner.clone()).run_from(draft()).await;
        assert!(matches!(no_reviewers, Err(OrchestrationError::Validation(_))));

        let no_drafter = RefinementLoop::new(refiner.clone())
            .with_reviewer(Arc::new(Rubric(95.0)))
            .run("brief")
            .await;
        assert!(matches!(no_drafter, Err(OrchestrationError::Validation(_))));

        let empty = RefinementLoop::new(refiner)
            .with_reviewer(Arc::new(Rubric(95.0)))
            .run_from(Vec::new())
            .await;
        assert!(matches!(empty, Err(OrchestrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_round() {
        let token = CancellationToken::new();
        token.cancel();
        let result = RefinementLoop::new(Arc::new(CountingRefiner::default()))
            .with_reviewer(Arc::new(Rubric(95.0)))
            .with_cancellation(token)
            .run_from(draft())
            .await;
        assert!(matches!(result, Err(OrchestrationError::Cancelled(_))));
    }

    struct VerdictAgent(AgentOutput);

    #[async_trait]
    impl Agent for VerdictAgent {
        fn id(&self) -> &str {
            "critic"
        }
        fn role(&self) -> Role {
            Role::Reviewer
        }
        async fn invoke(&self, context: AgentContext) -> OrchestrationResult<AgentOutput> {
            assert!(context.inputs[0].content.starts_with("## intro"));
            Ok(self.0.clone())
        }
    }

    fn artifact() -> ReviewArtifact {
        let sections = draft();
        ReviewArtifact {
            round: 1,
            merged: merge_sections(&sections),
            sections,
        }
    }

    #[tokio::test]
    async fn test_agent_reviewer_parses_structured_verdict() {
        let reviewer = AgentReviewer::new(
            "rubric",
            Arc::new(VerdictAgent(AgentOutput::structured(serde_json::json!({
                "status": "ok", "score": 93.0, "detail": "clear"
            })))),
        );
        let report = reviewer.review(&artifact()).await.unwrap();
        assert_eq!(report.source, "rubric");
        assert_eq!(report.score, Some(93.0));
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn test_agent_reviewer_rejects_unreadable_verdict() {
        let reviewer = AgentReviewer::new(
            "inclusivity",
            Arc::new(VerdictAgent(AgentOutput::text("Looks fine to me!"))),
        );
        let err = reviewer.review(&artifact()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
        assert!(err.to_string().contains("inclusivity"));
    }
}
