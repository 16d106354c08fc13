//! Draft sections and critique reports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One ordered piece of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    /// Position in the merged artifact (ascending).
    pub order: u32,
    /// Heading shown in the merged artifact; falls back to `id`.
    #[serde(default)]
    pub heading: Option<String>,
    pub body: String,
}

impl Section {
    pub fn new(id: impl Into<String>, order: u32, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order,
            heading: None,
            body: body.into(),
        }
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn title(&self) -> &str {
        self.heading.as_deref().unwrap_or(&self.id)
    }
}

/// Merge sections into one markdown artifact by declared order.
///
/// Each section renders as `## {title}\n\n{body}`; sections are separated by
/// a blank line. Ties in `order` keep their input order.
pub fn merge_sections(sections: &[Section]) -> String {
    let mut ordered: Vec<&Section> = sections.iter().collect();
    ordered.sort_by_key(|s| s.order);
    ordered
        .iter()
        .map(|s| format!("## {}\n\n{}", s.title(), s.body.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Verdict of a single reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[serde(alias = "OK", alias = "pass")]
    Ok,
    #[serde(alias = "FAIL")]
    Fail,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Output of one reviewer for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueReport {
    /// Reviewer name (matches the gate's score source for the scoring report).
    pub source: String,
    pub status: ReportStatus,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub detail: String,
}

impl CritiqueReport {
    pub fn ok(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: ReportStatus::Ok,
            score: None,
            detail: String::new(),
        }
    }

    pub fn fail(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: ReportStatus::Fail,
            score: None,
            detail: detail.into(),
        }
    }

    pub fn scored(source: impl Into<String>, score: f64) -> Self {
        Self {
            source: source.into(),
            status: ReportStatus::Ok,
            score: Some(score),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReportStatus::Ok
    }
}
