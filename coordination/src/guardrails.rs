//! Input / output guardrails run by the orchestrator.
//!
//! A guardrail either passes (possibly rewritten) text through or rejects it.
//! Guardrails run in registration order inside a [`GuardrailChain`]; the first
//! rejection aborts with [`OrchestrationError::ModerationRejected`] and no
//! later stage ever sees the rejected text.
//!
//! | Guardrail              | Effect                                             |
//! |------------------------|----------------------------------------------------|
//! | [`SizeLimitGuardrail`] | reject text outside `min..=max` bytes              |
//! | [`PiiRedactor`]        | replace emails, id numbers, phone numbers          |
//! | [`ModerationGuardrail`]| reject text a [`ModerationClassifier`] flags       |

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GuardrailConfig;
use crate::error::{OrchestrationError, OrchestrationResult};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w.+-]+@[\w-]+(\.[\w-]+)*\.[A-Za-z]{2,}").expect("EMAIL_RE regex should compile")
});

static ID_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ID_NUMBER_RE regex should compile")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b")
        .expect("PHONE_RE regex should compile")
});

pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";
pub const REDACTED_PHONE: &str = "[REDACTED_PHONE]";
pub const REDACTED_ID_NUMBER: &str = "[REDACTED_ID_NUMBER]";

/// Where in the run a guardrail is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    /// Before planning (the objective).
    Input,
    /// After synthesis (the final answer).
    Output,
}

impl fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Decision of a single guardrail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    /// Continue with this (possibly rewritten) text.
    Pass(String),
    Reject { reason: String },
}

/// A pre/post filter over text.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, stage: GuardrailStage, text: String)
        -> OrchestrationResult<GuardrailVerdict>;
}

/// Ordered list of guardrails applied as a unit.
#[derive(Clone, Default)]
pub struct GuardrailChain {
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl fmt::Debug for GuardrailChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.guardrails.iter().map(|g| g.name()).collect();
        f.debug_struct("GuardrailChain").field("guardrails", &names).finish()
    }
}

impl GuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size limits plus (optionally) PII redaction, per `config`.
    pub fn from_config(config: &GuardrailConfig) -> Self {
        let mut chain = Self::new().with(Arc::new(SizeLimitGuardrail::new(
            config.min_input_bytes,
            config.max_input_bytes,
        )));
        if config.redact_pii {
            chain = chain.with(Arc::new(PiiRedactor));
        }
        chain
    }

    pub fn with(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrails.push(guardrail);
        self
    }

    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Run every guardrail in order, threading rewritten text through.
    pub async fn apply(&self, stage: GuardrailStage, text: String) -> OrchestrationResult<String> {
        let mut current = text;
        for guardrail in &self.guardrails {
            match guardrail.apply(stage, current).await? {
                GuardrailVerdict::Pass(next) => {
                    debug!(stage = %stage, guardrail = guardrail.name(), "guardrail passed");
                    current = next;
                }
                GuardrailVerdict::Reject { reason } => {
                    warn!(stage = %stage, guardrail = guardrail.name(), %reason, "guardrail rejected content");
                    return Err(OrchestrationError::ModerationRejected {
                        stage: stage.to_string(),
                        guardrail: guardrail.name().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(current)
    }
}

/// Rejects text whose byte length falls outside `min..=max`.
#[derive(Debug, Clone)]
pub struct SizeLimitGuardrail {
    min_bytes: usize,
    max_bytes: usize,
}

impl SizeLimitGuardrail {
    pub fn new(min_bytes: usize, max_bytes: usize) -> Self {
        Self {
            min_bytes,
            max_bytes,
        }
    }
}

#[async_trait]
impl Guardrail for SizeLimitGuardrail {
    fn name(&self) -> &str {
        "size_limit"
    }

    async fn apply(
        &self,
        _stage: GuardrailStage,
        text: String,
    ) -> OrchestrationResult<GuardrailVerdict> {
        let len = text.len();
        if len > self.max_bytes {
            return Ok(GuardrailVerdict::Reject {
                reason: format!("{len} bytes exceeds the {} byte limit", self.max_bytes),
            });
        }
        if len < self.min_bytes {
            return Ok(GuardrailVerdict::Reject {
                reason: format!("{len} bytes is below the {} byte minimum", self.min_bytes),
            });
        }
        Ok(GuardrailVerdict::Pass(text))
    }
}

/// Replaces emails, id numbers (`123-45-6789`) and phone numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn redact(text: &str) -> String {
        let text = EMAIL_RE.replace_all(text, REDACTED_EMAIL);
        let text = ID_NUMBER_RE.replace_all(&text, REDACTED_ID_NUMBER);
        PHONE_RE.replace_all(&text, REDACTED_PHONE).into_owned()
    }
}

#[async_trait]
impl Guardrail for PiiRedactor {
    fn name(&self) -> &str {
        "pii_redaction"
    }

    async fn apply(
        &self,
        _stage: GuardrailStage,
        text: String,
    ) -> OrchestrationResult<GuardrailVerdict> {
        Ok(GuardrailVerdict::Pass(Self::redact(&text)))
    }
}

/// Classification returned by a moderation backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Content moderation collaborator.
#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> OrchestrationResult<ModerationResult>;
}

/// Rejects text flagged by a [`ModerationClassifier`].
///
/// A classifier failure is returned as-is, which aborts the run: unmoderated
/// content never passes.
pub struct ModerationGuardrail {
    classifier: Arc<dyn ModerationClassifier>,
}

impl ModerationGuardrail {
    pub fn new(classifier: Arc<dyn ModerationClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Guardrail for ModerationGuardrail {
    fn name(&self) -> &str {
        "moderation"
    }

    async fn apply(
        &self,
        _stage: GuardrailStage,
        text: String,
    ) -> OrchestrationResult<GuardrailVerdict> {
        let result = self.classifier.classify(&text).await?;
        if result.flagged {
            let categories = if result.categories.is_empty() {
                "unspecified".to_string()
            } else {
                result.categories.join(", ")
            };
            return Ok(GuardrailVerdict::Reject {
                reason: format!("flagged for: {categories}"),
            });
        }
        Ok(GuardrailVerdict::Pass(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct FixedClassifier(Option<ModerationResult>);

    #[async_trait]
    impl ModerationClassifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> OrchestrationResult<ModerationResult> {
            self.0
                .clone()
                .ok_or_else(|| OrchestrationError::Model("moderation endpoint down".into()))
        }
    }

    #[test]
    fn test_redacts_email_phone_and_id() {
        let out = PiiRedactor::redact(
            "Contact jane.doe@example.org or +1 555-123-4567; SSN 123-45-6789.",
        );
        assert!(out.contains(REDACTED_EMAIL));
        assert!(out.contains(REDACTED_PHONE));
        assert!(out.contains(REDACTED_ID_NUMBER));
        assert!(!out.contains("jane.doe"));
        assert!(!out.contains("4567"));
        assert!(!out.contains("6789"));
    }

    #[test]
    fn test_redaction_leaves_plain_text() {
        let text = "Write a 2024 blog post about remote work in 3 sections.";
        assert_eq!(PiiRedactor::redact(text), text);
    }

    #[tokio::test]
    async fn test_size_limit_rejects_oversized() {
        let chain = GuardrailChain::new().with(Arc::new(SizeLimitGuardrail::new(1, 8)));
        let err = chain
            .apply(GuardrailStage::Input, "far too long for the limit".into())
            .await
            .unwrap_err();
        match err {
            OrchestrationError::ModerationRejected {
                stage, guardrail, ..
            } => {
                assert_eq!(stage, "input");
                assert_eq!(guardrail, "size_limit");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_size_limit_rejects_empty() {
        let chain = GuardrailChain::from_config(&GuardrailConfig::default());
        let err = chain.apply(GuardrailStage::Input, String::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModerationRejected);
    }

    #[tokio::test]
    async fn test_chain_threads_rewritten_text() {
        let chain = GuardrailChain::from_config(&GuardrailConfig::default());
        assert_eq!(chain.len(), 2);
        let out = chain
            .apply(GuardrailStage::Output, "mail me at a@b.io".into())
            .await
            .unwrap();
        assert_eq!(out, "mail me at [REDACTED_EMAIL]");
    }

    #[tokio::test]
    async fn test_moderation_flag_rejects() {
        let classifier = FixedClassifier(Some(ModerationResult {
            flagged: true,
            categories: vec!["violence".into()],
        }));
        let chain = GuardrailChain::new().with(Arc::new(ModerationGuardrail::new(Arc::new(classifier))));
        let err = chain
            .apply(GuardrailStage::Input, "objective".into())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("violence"));
    }

    #[tokio::test]
    async fn test_moderation_backend_failure_aborts() {
        let chain = GuardrailChain::new()
            .with(Arc::new(ModerationGuardrail::new(Arc::new(FixedClassifier(None)))));
        let err = chain
            .apply(GuardrailStage::Input, "objective".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
    }

    #[tokio::test]
    async fn test_moderation_clean_passes() {
        let chain = GuardrailChain::new().with(Arc::new(ModerationGuardrail::new(Arc::new(
            FixedClassifier(Some(ModerationResult::default())),
        ))));
        let out = chain.apply(GuardrailStage::Input, "objective".into()).await.unwrap();
        assert_eq!(out, "objective");
    }
}
