//! Quality gate over one round's critique reports.

use serde::{Deserialize, Serialize};

use super::types::CritiqueReport;
use crate::config::RefinementConfig;

/// Pass iff the score report reaches `threshold` and every other report is OK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub threshold: f64,
    /// `source` of the report whose score is compared to the threshold.
    pub score_source: String,
}

/// Result of evaluating the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    /// Score found on the score report, if any.
    pub score: Option<f64>,
    /// Sources whose report kept the gate closed.
    pub failing: Vec<String>,
}

impl QualityGate {
    pub fn new(threshold: f64, score_source: impl Into<String>) -> Self {
        Self {
            threshold,
            score_source: score_source.into(),
        }
    }

    pub fn from_config(config: &RefinementConfig) -> Self {
        Self::new(config.score_threshold, config.score_source.clone())
    }

    pub fn evaluate(&self, reports: &[CritiqueReport]) -> GateDecision {
        let mut failing = Vec::new();
        let score_report = reports.iter().find(|r| r.source == self.score_source);
        let score = score_report.and_then(|r| r.score);

        match score {
            Some(s) if s >= self.threshold => {}
            _ => failing.push(self.score_source.clone()),
        }
        for report in reports {
            if report.source != self.score_source && !report.is_ok() {
                failing.push(report.source.clone());
            }
        }

        GateDecision {
            passed: failing.is_empty(),
            score,
            failing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> QualityGate {
        QualityGate::new(90.0, "rubric")
    }

    #[test]
    fn test_passes_at_threshold() {
        let d = gate().evaluate(&[
            CritiqueReport::scored("rubric", 90.0),
            CritiqueReport::ok("inclusivity"),
            CritiqueReport::ok("facts"),
        ]);
        assert!(d.passed);
        assert_eq!(d.score, Some(90.0));
    }

    #[test]
    fn test_low_score_fails() {
        let d = gate().evaluate(&[CritiqueReport::scored("rubric", 89.5), CritiqueReport::ok("facts")]);
        assert!(!d.passed);
        assert_eq!(d.failing, vec!["rubric"]);
    }

    #[test]
    fn test_other_failure_closes_gate() {
        let d = gate().evaluate(&[
            CritiqueReport::scored("rubric", 99.0),
            CritiqueReport::fail("inclusivity", "gendered language"),
        ]);
        assert!(!d.passed);
        assert_eq!(d.failing, vec!["inclusivity"]);
    }

    #[test]
    fn test_missing_score_report_fails() {
        let d = gate().evaluate(&[CritiqueReport::ok("facts")]);
        assert!(!d.passed);
        assert_eq!(d.score, None);
        assert_eq!(d.failing, vec!["rubric"]);
    }

    #[test]
    fn test_score_report_status_is_not_consulted() {
        // A scoring reviewer that errored reports Fail with no score.
        let d = gate().evaluate(&[CritiqueReport::fail("rubric", "timeout")]);
        assert_eq!(d.failing, vec!["rubric"]);
    }
}
