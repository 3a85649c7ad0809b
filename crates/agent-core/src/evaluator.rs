//! Evaluation stage: scores whether the recorded trajectory satisfies the
//! objective and proposes a rewritten query for the next planning cycle.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::AgentError;
use crate::prompt;
use crate::provider::{ProviderError, ReasoningProvider};

/// Evaluator configuration.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Budget for one provider call, in milliseconds.
    pub provider_timeout_ms: u64,
    /// Maximum number of gaps retained from the provider response.
    pub max_gaps: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: 60_000,
            max_gaps: 5,
        }
    }
}

/// Outcome of scoring a run against its objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// In `[0, 1]`; clamped on the way in.
    pub completeness: f64,
    pub gaps: Vec<String>,
    /// Rewritten query for the next planning cycle when completeness is low.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_query: Option<String>,
}

impl Evaluation {
    /// Unconditional acceptance; used when evaluation is disabled or the
    /// caller fails open after a provider error.
    pub fn accept() -> Self {
        Self {
            completeness: 1.0,
            gaps: Vec::new(),
            optimized_query: None,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EvaluationDraft {
    completeness: f64,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    optimized_query: Option<String>,
}

static EVALUATION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::to_value(schemars::schema_for!(EvaluationDraft))
        .expect("evaluation schema serializes")
});

/// Evaluation stage. A disabled stage accepts unconditionally, matching the
/// fail-open policy the orchestrator applies to provider failures.
pub struct EvaluationStage {
    provider: Option<Arc<dyn ReasoningProvider>>,
    config: EvaluatorConfig,
}

impl EvaluationStage {
    pub fn with_provider(provider: Arc<dyn ReasoningProvider>, config: EvaluatorConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    pub fn disabled() -> Self {
        Self {
            provider: None,
            config: EvaluatorConfig::default(),
        }
    }

    /// Score the trajectory against the objective.
    pub async fn evaluate(
        &self,
        objective: &str,
        diary: &[String],
        candidate_answer: Option<&str>,
    ) -> Result<Evaluation, AgentError> {
        let Some(provider) = &self.provider else {
            return Ok(Evaluation::accept());
        };

        let budget = Duration::from_millis(self.config.provider_timeout_ms);
        let user_prompt = prompt::evaluation_user_prompt(objective, diary, candidate_answer);
        let call = provider.invoke(
            prompt::EVALUATION_SYSTEM_PROMPT,
            &user_prompt,
            &EVALUATION_SCHEMA,
        );
        let value = match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(ProviderError::Timeout(ms))) => {
                return Err(AgentError::timeout("evaluation provider call", ms))
            }
            Ok(Err(err)) => return Err(AgentError::EvaluationProvider(err.to_string())),
            Err(_) => {
                return Err(AgentError::timeout(
                    "evaluation provider call",
                    self.config.provider_timeout_ms,
                ))
            }
        };

        let draft: EvaluationDraft = serde_json::from_value(value)
            .map_err(|err| AgentError::EvaluationProvider(err.to_string()))?;

        let mut gaps: Vec<String> = draft
            .gaps
            .into_iter()
            .map(|gap| gap.trim().to_string())
            .filter(|gap| !gap.is_empty())
            .collect();
        gaps.truncate(self.config.max_gaps);

        let completeness = if draft.completeness.is_nan() {
            0.0
        } else {
            draft.completeness.clamp(0.0, 1.0)
        };
        let optimized_query = draft
            .optimized_query
            .map(|query| query.trim().to_string())
            .filter(|query| !query.is_empty());

        debug!(completeness, gaps = gaps.len(), "evaluation scored run");
        Ok(Evaluation {
            completeness,
            gaps,
            optimized_query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use serde_json::json;

    #[tokio::test]
    async fn disabled_stage_accepts() {
        let stage = EvaluationStage::disabled();
        let result = stage.evaluate("goal", &[], None).await.unwrap();
        assert_eq!(result.completeness, 1.0);
        assert!(result.gaps.is_empty());
    }

    #[tokio::test]
    async fn clamps_completeness_and_truncates_gaps() {
        let provider = MockProvider::new();
        provider.push_value(json!({
            "completeness": 1.8,
            "gaps": ["a", "b", "c", "d", "e", "f", "  "],
            "optimized_query": "  "
        }));
        let stage =
            EvaluationStage::with_provider(Arc::new(provider), EvaluatorConfig::default());

        let result = stage
            .evaluate("goal", &["Step 1: navigate succeeded".to_string()], None)
            .await
            .unwrap();
        assert_eq!(result.completeness, 1.0);
        assert_eq!(result.gaps.len(), 5);
        assert!(result.optimized_query.is_none());
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_evaluation_error() {
        let provider = MockProvider::new();
        provider.push_error(ProviderError::RateLimited);
        let stage =
            EvaluationStage::with_provider(Arc::new(provider), EvaluatorConfig::default());

        let err = stage.evaluate("goal", &[], None).await.unwrap_err();
        assert!(matches!(err, AgentError::EvaluationProvider(_)));
    }
}
