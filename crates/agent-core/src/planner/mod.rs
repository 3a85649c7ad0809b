//! Planning stage: turns a task request into a validated [`Plan`].

mod rule_based;

pub use rule_based::RulePlanner;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::model::TaskRequest;
use crate::plan::{Plan, StepAction};
use crate::plan_validator::PlanValidator;
use crate::prompt;
use crate::provider::{ProviderError, ReasoningProvider};

/// Planner configuration controlling prompt and fallback behaviour.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Maximum number of steps the planner may emit.
    pub max_steps: usize,
    /// Budget for one provider call, in milliseconds.
    pub provider_timeout_ms: u64,
    /// Whether the rule planner prepends navigation when a URL is detected.
    pub auto_navigate: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            provider_timeout_ms: 60_000,
            auto_navigate: true,
        }
    }
}

/// Result from the planning stage including reasoning bullets.
#[derive(Debug, Clone)]
pub struct PlannerOutcome {
    pub plan: Plan,
    /// Bullet-style explanations summarising the planner's reasoning.
    pub explanations: Vec<String>,
}

/// Wire format requested from the reasoning provider.
#[derive(Debug, Deserialize, JsonSchema)]
struct PlanDraft {
    steps: Vec<StepDraft>,
    #[serde(default)]
    estimated_steps: Option<u32>,
    #[serde(default)]
    complexity_score: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct StepDraft {
    action: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    expected_outcome: Option<String>,
    #[serde(default)]
    validation_criteria: Option<String>,
}

static PLAN_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::to_value(schemars::schema_for!(PlanDraft)).expect("plan schema serializes")
});

enum PlannerBackend {
    Provider(Arc<dyn ReasoningProvider>),
    Rules(RulePlanner),
}

/// Planning stage. Provider-backed when the run's capabilities allow it,
/// deterministic rule-based otherwise.
pub struct PlanningStage {
    backend: PlannerBackend,
    config: PlannerConfig,
}

impl PlanningStage {
    pub fn with_provider(provider: Arc<dyn ReasoningProvider>, config: PlannerConfig) -> Self {
        Self {
            backend: PlannerBackend::Provider(provider),
            config,
        }
    }

    pub fn rule_based(config: PlannerConfig) -> Self {
        Self {
            backend: PlannerBackend::Rules(RulePlanner::new(config.clone())),
            config,
        }
    }

    pub fn is_provider_backed(&self) -> bool {
        matches!(self.backend, PlannerBackend::Provider(_))
    }

    /// Generate a fresh plan for the request.
    pub async fn plan(&self, request: &TaskRequest) -> Result<PlannerOutcome, AgentError> {
        ensure_query(request)?;
        match &self.backend {
            PlannerBackend::Rules(planner) => planner.draft_plan(request),
            PlannerBackend::Provider(provider) => {
                let user_prompt = prompt::planning_user_prompt(request, self.config.max_steps);
                self.invoke_and_parse(provider.as_ref(), &user_prompt, request)
                    .await
            }
        }
    }

    /// Generate a follow-up plan after a failed or rejected cycle. The
    /// failure summary is embedded into the provider prompt; the rule
    /// backend simply re-drafts against the (possibly rewritten) request.
    pub async fn replan(
        &self,
        request: &TaskRequest,
        previous: &Plan,
        failure_summary: &str,
    ) -> Result<PlannerOutcome, AgentError> {
        ensure_query(request)?;
        match &self.backend {
            PlannerBackend::Rules(planner) => planner.draft_plan(request),
            PlannerBackend::Provider(provider) => {
                let user_prompt = prompt::replanning_user_prompt(
                    request,
                    previous,
                    failure_summary,
                    self.config.max_steps,
                );
                self.invoke_and_parse(provider.as_ref(), &user_prompt, request)
                    .await
            }
        }
    }

    /// Single-step plan that answers directly without touching the browser.
    /// Used when planning retries are exhausted and the fallback is enabled.
    pub fn direct_answer_plan(&self, request: &TaskRequest) -> PlannerOutcome {
        RulePlanner::new(self.config.clone()).direct_answer_plan(request)
    }

    async fn invoke_and_parse(
        &self,
        provider: &dyn ReasoningProvider,
        user_prompt: &str,
        request: &TaskRequest,
    ) -> Result<PlannerOutcome, AgentError> {
        let budget = Duration::from_millis(self.config.provider_timeout_ms);
        let call = provider.invoke(prompt::PLANNING_SYSTEM_PROMPT, user_prompt, &PLAN_SCHEMA);
        let value = match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(ProviderError::Timeout(ms))) => {
                return Err(AgentError::timeout("planning provider call", ms))
            }
            Ok(Err(err)) => return Err(AgentError::PlanningProvider(err.to_string())),
            Err(_) => {
                return Err(AgentError::timeout(
                    "planning provider call",
                    self.config.provider_timeout_ms,
                ))
            }
        };

        let draft: PlanDraft = serde_json::from_value(value)
            .map_err(|err| AgentError::PlanningSchema(err.to_string()))?;
        self.plan_from_draft(draft, request)
    }

    fn plan_from_draft(
        &self,
        draft: PlanDraft,
        request: &TaskRequest,
    ) -> Result<PlannerOutcome, AgentError> {
        let mut plan = Plan::new(request.query.trim());
        let mut dropped = 0usize;
        for step in draft.steps {
            if plan.steps.len() >= self.config.max_steps {
                dropped += 1;
                continue;
            }
            let planned = plan.push_step(StepAction::parse(&step.action), step.target);
            if let Some(reasoning) = step.reasoning {
                planned.reasoning = reasoning;
            }
            if let Some(outcome) = step.expected_outcome {
                planned.expected_outcome = outcome;
            }
            if let Some(criteria) = step.validation_criteria {
                planned.validation_criteria = criteria;
            }
        }
        if dropped > 0 {
            warn!(dropped, "planner exceeded step budget; truncating plan");
        }

        plan.estimated_steps = draft.estimated_steps.unwrap_or(plan.steps.len() as u32);
        plan.complexity_score = draft.complexity_score.unwrap_or(0.5);
        plan.confidence = draft.confidence.unwrap_or(0.5);

        PlanValidator::default()
            .validate(&mut plan)
            .map_err(|issue| AgentError::PlanningSchema(issue.to_string()))?;

        debug!(
            steps = plan.steps.len(),
            confidence = plan.confidence,
            "validated planner output"
        );
        let explanations = vec![format!(
            "Planner proposed {} step(s) with confidence {:.2}",
            plan.steps.len(),
            plan.confidence
        )];
        Ok(PlannerOutcome { plan, explanations })
    }
}

fn ensure_query(request: &TaskRequest) -> Result<(), AgentError> {
    if request.query.trim().is_empty() {
        return Err(AgentError::invalid_request("task query cannot be empty"));
    }
    Ok(())
}
