//! Refinement loop integration tests — scripted reviewers, counting refiner.
//!
//! Covers the round-1 pass, the refiner call bound, and the
//! DoneWithWarnings path that keeps every round's reports.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use agent_coordination::{
    CritiqueReport, Drafter, OrchestrationConfig, OrchestrationResult, QualityGate, Refiner,
    RefinementLoop, RefinementStatus, ReportStatus, ReviewArtifact, Reviewer, Section,
};
use async_trait::async_trait;

/// Returns the same report every round and records what it reviewed.
struct FixedReviewer {
    report: CritiqueReport,
    seen: Mutex<Vec<ReviewArtifact>>,
}

impl FixedReviewer {
    fn new(report: CritiqueReport) -> Arc<Self> {
        Arc::new(Self {
            report,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Reviewer for FixedReviewer {
    fn name(&self) -> &str {
        &self.report.source
    }

    async fn review(&self, artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport> {
        self.seen.lock().unwrap().push(artifact.clone());
        Ok(self.report.clone())
    }
}

/// Rubric score that improves by a fixed step each round.
struct ImprovingRubric {
    start: f64,
    step: f64,
    round: AtomicU32,
}

#[async_trait]
impl Reviewer for ImprovingRubric {
    fn name(&self) -> &str {
        "rubric"
    }

    async fn review(&self, _artifact: &ReviewArtifact) -> OrchestrationResult<CritiqueReport> {
        let n = self.round.fetch_add(1, Ordering::SeqCst);
        Ok(CritiqueReport::scored("rubric", self.start + self.step * n as f64))
    }
}

#[derive(Default)]
struct CountingRefiner {
    calls: AtomicU32,
    received_reports: Mutex<Vec<usize>>,
}

#[async_trait]
impl Refiner for CountingRefiner {
    async fn refine(
        &self,
        sections: &[Section],
        reports: &[CritiqueReport],
    ) -> OrchestrationResult<Vec<Section>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.received_reports.lock().unwrap().push(reports.len());
        Ok(sections
            .iter()
            .map(|s| Section {
                body: format!("{} [v{}]", s.body, n + 1),
                ..s.clone()
            })
            .collect())
    }
}

struct TwoSectionDrafter;

#[async_trait]
impl Drafter for TwoSectionDrafter {
    async fn draft(&self, brief: &str) -> OrchestrationResult<Vec<Section>> {
        Ok(vec![
            Section::new("impact", 2, "Broad benefit.").with_heading("Impact"),
            Section::new("summary", 1, format!("About {brief}.")).with_heading("Summary"),
        ])
    }
}

// ── Gate passes immediately ────────────────────────────────────────

#[tokio::test]
async fn test_gate_passes_on_round_one_without_refining() {
    let refiner = Arc::new(CountingRefiner::default());
    let rubric = FixedReviewer::new(CritiqueReport::scored("rubric", 95.0));
    let outcome = RefinementLoop::new(refiner.clone())
        .with_drafter(Arc::new(TwoSectionDrafter))
        .with_reviewer(rubric.clone())
        .with_reviewer(FixedReviewer::new(CritiqueReport::ok("inclusivity")))
        .with_reviewer(FixedReviewer::new(CritiqueReport::ok("fact_check")))
        .run("solar microgrids")
        .await
        .unwrap();

    assert_eq!(outcome.status, RefinementStatus::Done);
    assert!(outcome.passed());
    assert_eq!(outcome.rounds, 1);
    assert_eq!(refiner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.final_reports().len(), 3);
    assert!(outcome.unresolved.is_empty());
    assert!(outcome.gate_not_met().is_none());

    // Reviewers see the whole merged artifact, in declared section order.
    let seen = rubric.seen.lock().unwrap();
    assert_eq!(
        seen[0].merged,
        "## Summary\n\nAbout solar microgrids.\n\n## Impact\n\nBroad benefit."
    );
    assert_eq!(outcome.artifact, seen[0].merged);
}

// ── Refiner call bound ─────────────────────────────────────────────

#[tokio::test]
async fn test_refiner_called_at_most_max_rounds_minus_one() {
    for max_rounds in 1..=5 {
        let refiner = Arc::new(CountingRefiner::default());
        let outcome = RefinementLoop::new(refiner.clone())
            .with_max_rounds(max_rounds)
            .with_reviewer(FixedReviewer::new(CritiqueReport::scored("rubric", 10.0)))
            .run_from(vec![Section::new("s", 1, "text")])
            .await
            .unwrap();

        assert_eq!(outcome.rounds, max_rounds);
        assert_eq!(refiner.calls.load(Ordering::SeqCst), max_rounds - 1);
        assert_eq!(outcome.status, RefinementStatus::DoneWithWarnings);
    }
}

#[tokio::test]
async fn test_improving_draft_passes_mid_budget() {
    let refiner = Arc::new(CountingRefiner::default());
    let outcome = RefinementLoop::new(refiner.clone())
        .with_reviewer(Arc::new(ImprovingRubric {
            start: 70.0,
            step: 15.0,
            round: AtomicU32::new(0),
        }))
        .run_from(vec![Section::new("s", 1, "text")])
        .await
        .unwrap();

    // 70 → 85 → 100
    assert_eq!(outcome.status, RefinementStatus::Done);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(refiner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.artifact, "## s\n\ntext [v2] [v3]");
}

// ── Budget exhausted ───────────────────────────────────────────────

#[tokio::test]
async fn test_persistent_failures_end_with_warnings_and_keep_all_reports() {
    let refiner = Arc::new(CountingRefiner::default());
    let config = OrchestrationConfig::default();
    let outcome = RefinementLoop::new(refiner.clone())
        .with_config(&config.refinement)
        .with_drafter(Arc::new(TwoSectionDrafter))
        .with_reviewer(FixedReviewer::new(CritiqueReport::scored("rubric", 60.0)))
        .with_reviewer(FixedReviewer::new(
            CritiqueReport::fail("inclusivity", "uses gendered language"),
        ))
        .with_reviewer(FixedReviewer::new(CritiqueReport::ok("fact_check")))
        .run("a grant proposal")
        .await
        .unwrap();

    assert_eq!(outcome.status, RefinementStatus::DoneWithWarnings);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(refiner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*refiner.received_reports.lock().unwrap(), vec![3, 3]);

    // Round-3 artifact is the one returned.
    assert_eq!(outcome.history.len(), 3);
    assert!(outcome.refiner_failure.is_none());
    assert_eq!(outcome.artifact, outcome.history[2].artifact);
    assert!(outcome.artifact.contains("[v3]"));

    // All three rounds' reports are kept.
    assert_eq!(outcome.all_reports().len(), 9);
    for record in &outcome.history {
        assert!(!record.decision.passed);
        assert_eq!(record.reports.len(), 3);
    }

    let unresolved: Vec<&str> = outcome.unresolved.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(unresolved, vec!["rubric", "inclusivity"]);
    assert_eq!(outcome.unresolved[1].status, ReportStatus::Fail);

    let warning = outcome.gate_not_met().unwrap().to_string();
    assert!(warning.contains("3 round(s)"));
    assert!(warning.contains("inclusivity"));
}

#[tokio::test]
async fn test_threshold_and_score_source_are_configurable() {
    let config = OrchestrationConfig::from_toml_str(
        r#"
        [refinement]
        score_threshold = 55.0
        score_source = "novelty"
        max_rounds = 2
        "#,
    )
    .unwrap();
    let refiner = Arc::new(CountingRefiner::default());
    let refinement = RefinementLoop::new(refiner.clone()).with_config(&config.refinement);
    assert_eq!(refinement.gate(), &QualityGate::new(55.0, "novelty"));

    let outcome = refinement
        .with_reviewer(FixedReviewer::new(CritiqueReport::scored("novelty", 60.0)))
        .run_from(vec![Section::new("s", 1, "text")])
        .await
        .unwrap();
    assert!(outcome.passed());
    assert_eq!(refiner.calls.load(Ordering::SeqCst), 0);
}
