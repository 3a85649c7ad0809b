//! Failure analysis: structured post-mortem for failed or rejected runs.
//!
//! This stage never fails the run. Provider problems collapse into a
//! deterministic report assembled from the diary alone.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::prompt;
use crate::provider::ReasoningProvider;

const FALLBACK_BLAME: &str =
    "Unable to analyze the failure: the diagnostic provider was unavailable.";
const FALLBACK_IMPROVEMENT: &str = "Retry with a simpler plan, confirm the starting URL is \
reachable, and check that every planned action has a registered tool.";

/// Analysis configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Budget for one provider call, in milliseconds.
    pub provider_timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 60_000,
        }
    }
}

/// Structured post-mortem: what happened, the likely root cause, and what to
/// change next time. All three fields are always non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub recap: String,
    pub blame: String,
    pub improvement: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FailureReportDraft {
    #[serde(default)]
    recap: String,
    #[serde(default)]
    blame: String,
    #[serde(default)]
    improvement: String,
}

static ANALYSIS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::to_value(schemars::schema_for!(FailureReportDraft))
        .expect("analysis schema serializes")
});

/// Error-analysis stage.
pub struct ErrorAnalysisStage {
    provider: Option<Arc<dyn ReasoningProvider>>,
    config: AnalysisConfig,
}

impl ErrorAnalysisStage {
    pub fn with_provider(provider: Arc<dyn ReasoningProvider>, config: AnalysisConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    pub fn offline() -> Self {
        Self {
            provider: None,
            config: AnalysisConfig::default(),
        }
    }

    /// Diagnose a failed run. Infallible: any provider problem yields the
    /// deterministic fallback report instead.
    pub async fn analyze_failure(
        &self,
        diary: &[String],
        original_query: &str,
        final_answer: Option<&str>,
        evaluator_feedback: Option<&str>,
    ) -> FailureReport {
        let fallback = Self::fallback_report(diary.len(), evaluator_feedback);
        let Some(provider) = &self.provider else {
            return fallback;
        };

        let budget = Duration::from_millis(self.config.provider_timeout_ms);
        let user_prompt =
            prompt::analysis_user_prompt(diary, original_query, final_answer, evaluator_feedback);
        let call = provider.invoke(
            prompt::ANALYSIS_SYSTEM_PROMPT,
            &user_prompt,
            &ANALYSIS_SCHEMA,
        );
        let value = match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(%err, "failure analysis provider failed; using fallback report");
                return fallback;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.provider_timeout_ms,
                    "failure analysis timed out; using fallback report"
                );
                return fallback;
            }
        };

        match serde_json::from_value::<FailureReportDraft>(value) {
            Ok(draft) => FailureReport {
                recap: non_empty_or(draft.recap, fallback.recap),
                blame: non_empty_or(draft.blame, fallback.blame),
                improvement: non_empty_or(draft.improvement, fallback.improvement),
            },
            Err(err) => {
                warn!(%err, "failure analysis returned malformed output; using fallback report");
                fallback
            }
        }
    }

    /// Deterministic report assembled without any provider call.
    pub fn fallback_report(step_count: usize, evaluator_feedback: Option<&str>) -> FailureReport {
        let noun = if step_count == 1 { "entry" } else { "entries" };
        let recap = match evaluator_feedback.map(str::trim).filter(|f| !f.is_empty()) {
            Some(feedback) => format!(
                "The run recorded {step_count} diary {noun} before stopping. Evaluator feedback: {feedback}"
            ),
            None => format!("The run recorded {step_count} diary {noun} before stopping."),
        };
        FailureReport {
            recap,
            blame: FALLBACK_BLAME.to_string(),
            improvement: FALLBACK_IMPROVEMENT.to_string(),
        }
    }
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, ProviderError};
    use serde_json::json;

    #[tokio::test]
    async fn offline_stage_produces_fallback() {
        let stage = ErrorAnalysisStage::offline();
        let report = stage
            .analyze_failure(
                &["Step 1: navigate failed".to_string()],
                "load the page",
                None,
                Some("navigation never completed"),
            )
            .await;
        assert!(report.recap.contains("1 diary entry"));
        assert!(report.recap.contains("navigation never completed"));
        assert!(!report.blame.is_empty());
        assert!(!report.improvement.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_absorbed() {
        let provider = MockProvider::new();
        provider.push_error(ProviderError::Transport("connection refused".to_string()));
        let stage = ErrorAnalysisStage::with_provider(Arc::new(provider), AnalysisConfig::default());

        let report = stage.analyze_failure(&[], "goal", None, None).await;
        assert_eq!(report.blame, FALLBACK_BLAME);
    }

    #[tokio::test]
    async fn empty_provider_fields_fall_back_per_field() {
        let provider = MockProvider::new();
        provider.push_value(json!({
            "recap": "The navigation step failed twice.",
            "blame": "",
            "improvement": "Use the mobile site."
        }));
        let stage = ErrorAnalysisStage::with_provider(Arc::new(provider), AnalysisConfig::default());

        let report = stage.analyze_failure(&[], "goal", None, None).await;
        assert_eq!(report.recap, "The navigation step failed twice.");
        assert_eq!(report.blame, FALLBACK_BLAME);
        assert_eq!(report.improvement, "Use the mobile site.");
    }
}
