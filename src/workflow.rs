//! Workflow orchestrator: the run-level state machine.
//!
//! `Planning -> Executing -> Evaluating -> {Replanning -> Planning |
//! Summarizing -> Completed | Failed}`. Failed runs pass through the
//! error-analysis stage before surfacing; the global wall-clock budget
//! forces a deterministic conclusion with no further provider calls.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agent_core::{
    AgentError, AnalysisConfig, Capabilities, ErrorAnalysisStage, Evaluation, EvaluationStage,
    EvaluatorConfig, FailureReport, Plan, PlannerConfig, PlannerOutcome, PlanningStage,
    ReasoningProvider, RunContext, StepAction, StepStatus, TaskRequest,
};
use webpilot_event_broker::ProgressBroker;

use crate::config::{TimeoutOutcome, WorkflowConfig};
use crate::executor::{self, ExecutionReport, StepRecord};
use crate::summary;
use crate::tools::ToolRegistry;

/// Phase of the run-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Executing,
    Evaluating,
    Replanning,
    Summarizing,
    Completed,
    Failed,
}

/// Run-scoped state owned exclusively by the orchestrator. Other stages
/// receive read-only views and return new data instead of mutating it.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub phase: WorkflowPhase,
    pub query: String,
    pub current_plan: Option<Plan>,
    /// Append-only narration of the run; evaluation and diagnosis input.
    pub diary: Vec<String>,
    /// Read-only projection of the execution log, accumulated across
    /// planning cycles. Only the final outcome per step is recorded.
    pub executed_steps: Vec<StepRecord>,
    pub replan_cycles: u32,
    pub confidence: Option<f64>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub failure_report: Option<FailureReport>,
}

impl WorkflowState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            phase: WorkflowPhase::Planning,
            query: query.into(),
            current_plan: None,
            diary: Vec::new(),
            executed_steps: Vec::new(),
            replan_cycles: 0,
            confidence: None,
            final_answer: None,
            error: None,
            failure_report: None,
        }
    }
}

/// Final outcome surfaced to the caller that started the run. Every run,
/// including failures, yields one of these; nothing throws past the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum DriveEnd {
    Finished(RunResult),
    TimedOut,
    Cancelled,
}

/// Top-level state machine composing the planning, execution, evaluation,
/// and error-analysis stages. One instance drives one logical run and owns
/// its event broker; concurrent runs never share state.
pub struct WorkflowRunner {
    planning: PlanningStage,
    evaluation: EvaluationStage,
    diagnosis: ErrorAnalysisStage,
    registry: Arc<ToolRegistry>,
    broker: Arc<ProgressBroker>,
    config: WorkflowConfig,
    cancel: CancellationToken,
}

impl WorkflowRunner {
    /// Provider-backed runner with every capability enabled.
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        registry: Arc<ToolRegistry>,
        config: WorkflowConfig,
    ) -> Self {
        Self::with_capabilities(Some(provider), Capabilities::full(), registry, config)
    }

    /// Deterministic runner: rule-based planning, fail-open evaluation,
    /// fallback-only diagnosis.
    pub fn offline(registry: Arc<ToolRegistry>, config: WorkflowConfig) -> Self {
        Self::with_capabilities(None, Capabilities::offline(), registry, config)
    }

    /// Build a runner with capabilities resolved once at configuration time.
    /// Stages branch on the flags here, not on credential checks at call
    /// sites.
    pub fn with_capabilities(
        provider: Option<Arc<dyn ReasoningProvider>>,
        capabilities: Capabilities,
        registry: Arc<ToolRegistry>,
        config: WorkflowConfig,
    ) -> Self {
        let provider_timeout_ms = config.provider_timeout.as_millis() as u64;
        let planner_config = PlannerConfig {
            provider_timeout_ms,
            ..PlannerConfig::default()
        };

        let planning = match (&provider, capabilities.llm_planning) {
            (Some(provider), true) => {
                PlanningStage::with_provider(Arc::clone(provider), planner_config)
            }
            _ => PlanningStage::rule_based(planner_config),
        };
        let evaluation = match (&provider, capabilities.llm_evaluation) {
            (Some(provider), true) => EvaluationStage::with_provider(
                Arc::clone(provider),
                EvaluatorConfig {
                    provider_timeout_ms,
                    ..EvaluatorConfig::default()
                },
            ),
            _ => EvaluationStage::disabled(),
        };
        let diagnosis = match (&provider, capabilities.llm_diagnosis) {
            (Some(provider), true) => ErrorAnalysisStage::with_provider(
                Arc::clone(provider),
                AnalysisConfig {
                    provider_timeout_ms,
                },
            ),
            _ => ErrorAnalysisStage::offline(),
        };

        Self {
            planning,
            evaluation,
            diagnosis,
            registry,
            broker: ProgressBroker::new(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Per-run event broker; subscribe before calling [`Self::run`].
    pub fn broker(&self) -> Arc<ProgressBroker> {
        Arc::clone(&self.broker)
    }

    /// External cancellation signal, observed at every suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the run to a terminal state.
    pub async fn run(&self, query: &str) -> RunResult {
        self.run_with_state(query).await.0
    }

    /// Same as [`Self::run`], additionally returning the final state for
    /// callers that need the diary, executed steps, or failure report.
    pub async fn run_with_state(&self, query: &str) -> (RunResult, WorkflowState) {
        let mut state = WorkflowState::new(query);

        let end = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => DriveEnd::Cancelled,
            result = self.drive(&mut state) => DriveEnd::Finished(result),
            _ = tokio::time::sleep(self.config.run_timeout) => DriveEnd::TimedOut,
        };

        let result = match end {
            DriveEnd::Finished(result) => result,
            DriveEnd::TimedOut => self.conclude_on_timeout(&mut state),
            DriveEnd::Cancelled => self.conclude_on_cancel(&mut state),
        };
        (result, state)
    }

    async fn drive(&self, state: &mut WorkflowState) -> RunResult {
        let base_request = TaskRequest::new(state.query.clone()).with_context(
            RunContext::default().with_available_tools(self.registry.names()),
        );
        let mut optimized_query: Option<String> = None;
        let mut failure_summary: Option<String> = None;
        let mut previous_plan: Option<Plan> = None;

        loop {
            state.phase = WorkflowPhase::Planning;
            let mut request = base_request.clone();
            if let Some(query) = optimized_query.take() {
                debug!(%query, "planning against the evaluator's optimized query");
                request.query = query;
            }

            let outcome = match self
                .plan_with_retries(
                    &request,
                    state,
                    previous_plan.as_ref(),
                    failure_summary.as_deref(),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(AgentError::Cancelled) => return self.conclude_on_cancel(state),
                Err(err) => return self.conclude_failed(state, err.to_string(), None).await,
            };
            let PlannerOutcome { plan, explanations } = outcome;
            if !explanations.is_empty() {
                debug!(explanations = %explanations.join(" | "), "planner rationale");
            }
            state.diary.push(format!(
                "Planned {} step(s) with confidence {:.2} for: {}",
                plan.steps.len(),
                plan.confidence,
                plan.objective
            ));
            state.confidence = Some(plan.confidence);
            state.current_plan = Some(plan.clone());

            state.phase = WorkflowPhase::Executing;
            let report = match executor::execute_plan(
                &plan,
                self.registry.as_ref(),
                self.broker.as_ref(),
                &self.config.execution,
                &self.cancel,
                &mut state.diary,
            )
            .await
            {
                Ok(report) => report,
                Err(_) => return self.conclude_on_cancel(state),
            };
            state.executed_steps.extend(report.steps.iter().cloned());

            if let Some(reason) = report.critical_failure.clone() {
                return self.conclude_failed(state, reason, None).await;
            }

            state.phase = WorkflowPhase::Evaluating;
            let candidate = candidate_answer(&state.executed_steps);
            let evaluation = match self
                .evaluation
                .evaluate(&state.query, &state.diary, candidate.as_deref())
                .await
            {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    // Fail-open: a broken evaluator must not block completion.
                    warn!(%err, "evaluation failed; accepting the current answer");
                    state
                        .diary
                        .push("Evaluator unavailable; accepting the current answer.".to_string());
                    Evaluation::accept()
                }
            };
            state.diary.push(format!(
                "Evaluation scored completeness {:.2} with {} gap(s).",
                evaluation.completeness,
                evaluation.gaps.len()
            ));

            if evaluation.completeness >= self.config.completeness_threshold {
                return self.conclude_success(state, candidate, evaluation.completeness);
            }
            if state.replan_cycles >= self.config.max_replan_cycles {
                return self.conclude_degraded(state, candidate, &evaluation).await;
            }

            state.phase = WorkflowPhase::Replanning;
            state.replan_cycles += 1;
            optimized_query = evaluation.optimized_query.clone();
            failure_summary = Some(replan_failure_summary(&report, &evaluation));
            previous_plan = Some(plan);
            state.diary.push(format!(
                "Replanning cycle {} of {}.",
                state.replan_cycles, self.config.max_replan_cycles
            ));
            info!(cycle = state.replan_cycles, "replanning after rejected evaluation");
        }
    }

    async fn plan_with_retries(
        &self,
        request: &TaskRequest,
        state: &mut WorkflowState,
        previous_plan: Option<&Plan>,
        failure_summary: Option<&str>,
    ) -> Result<PlannerOutcome, AgentError> {
        let mut attempt = 0u32;
        loop {
            let result = match previous_plan {
                Some(previous) => {
                    self.planning
                        .replan(
                            request,
                            previous,
                            failure_summary.unwrap_or("previous cycle was rejected"),
                        )
                        .await
                }
                None => self.planning.plan(request).await,
            };
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err @ (AgentError::PlanningProvider(_) | AgentError::Timeout { .. })) => {
                    if attempt < self.config.max_plan_retries {
                        attempt += 1;
                        warn!(%err, attempt, "planning failed; retrying in place");
                        state
                            .diary
                            .push(format!("Planning attempt {attempt} failed ({err}); retrying."));
                        continue;
                    }
                    if self.config.fallback_direct_answer {
                        state.diary.push(
                            "Planning retries exhausted; falling back to a direct answer plan."
                                .to_string(),
                        );
                        return Ok(self.planning.direct_answer_plan(request));
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn conclude_success(
        &self,
        state: &mut WorkflowState,
        candidate: Option<String>,
        completeness: f64,
    ) -> RunResult {
        state.phase = WorkflowPhase::Summarizing;
        let answer = candidate
            .unwrap_or_else(|| summary::fallback_summary(&state.query, &state.executed_steps));
        state.final_answer = Some(answer);
        state.confidence = Some(completeness);
        state.phase = WorkflowPhase::Completed;
        info!(steps = state.executed_steps.len(), "run completed");
        self.result_from(state, true)
    }

    async fn conclude_degraded(
        &self,
        state: &mut WorkflowState,
        candidate: Option<String>,
        evaluation: &Evaluation,
    ) -> RunResult {
        state.diary.push(
            "Replanning budget exhausted; settling for a best-effort answer.".to_string(),
        );
        let feedback = if evaluation.gaps.is_empty() {
            None
        } else {
            Some(evaluation.gaps.join("; "))
        };
        let report = self
            .diagnosis
            .analyze_failure(
                &state.diary,
                &state.query,
                state.final_answer.as_deref(),
                feedback.as_deref(),
            )
            .await;
        state.diary.push(format!("Failure analysis: {}", report.blame));
        state.failure_report = Some(report);

        state.phase = WorkflowPhase::Summarizing;
        let answer = candidate
            .unwrap_or_else(|| summary::fallback_summary(&state.query, &state.executed_steps));
        state.final_answer = Some(answer);
        state.confidence = Some(evaluation.completeness);
        state.phase = WorkflowPhase::Completed;
        info!("run completed degraded after exhausting replanning cycles");
        self.result_from(state, true)
    }

    async fn conclude_failed(
        &self,
        state: &mut WorkflowState,
        reason: String,
        evaluator_feedback: Option<&str>,
    ) -> RunResult {
        warn!(error = %reason, "run failed");
        state.phase = WorkflowPhase::Failed;
        state.error = Some(reason);
        let report = self
            .diagnosis
            .analyze_failure(
                &state.diary,
                &state.query,
                state.final_answer.as_deref(),
                evaluator_feedback,
            )
            .await;
        state.diary.push(format!("Failure analysis: {}", report.blame));
        state.failure_report = Some(report);
        self.result_from(state, false)
    }

    fn conclude_on_cancel(&self, state: &mut WorkflowState) -> RunResult {
        info!("run cancelled; skipping diagnostics");
        state.phase = WorkflowPhase::Failed;
        state.error = Some(AgentError::Cancelled.to_string());
        state.diary.push("Run cancelled by external signal.".to_string());
        self.result_from(state, false)
    }

    fn conclude_on_timeout(&self, state: &mut WorkflowState) -> RunResult {
        state.phase = WorkflowPhase::Summarizing;
        state.diary.push(
            "Global run timeout reached; concluding with the fallback summary.".to_string(),
        );
        let text = summary::fallback_summary(&state.query, &state.executed_steps);
        state.final_answer = Some(text);

        match self.config.on_timeout {
            TimeoutOutcome::DegradedSuccess => {
                state.phase = WorkflowPhase::Completed;
                warn!("run timed out; concluding as degraded success");
                self.result_from(state, true)
            }
            TimeoutOutcome::Fail => {
                state.phase = WorkflowPhase::Failed;
                state.error = Some("run exceeded its wall-clock budget".to_string());
                // No provider call is allowed past the deadline; attach the
                // deterministic report directly.
                state.failure_report = Some(ErrorAnalysisStage::fallback_report(
                    state.diary.len(),
                    None,
                ));
                warn!("run timed out; concluding as failed");
                self.result_from(state, false)
            }
        }
    }

    fn result_from(&self, state: &WorkflowState, success: bool) -> RunResult {
        RunResult {
            success,
            steps: state.executed_steps.len() as u32,
            final_url: summary::last_url(&state.executed_steps),
            final_answer: state.final_answer.clone(),
            error: state.error.clone(),
        }
    }
}

/// Best candidate answer produced by the trajectory so far: the payload of
/// the most recent successful answer or page-context step.
fn candidate_answer(records: &[StepRecord]) -> Option<String> {
    records.iter().rev().find_map(|record| {
        if record.status != StepStatus::Succeeded {
            return None;
        }
        match record.action {
            StepAction::Answer | StepAction::GetPageContext => {
                record.data.as_ref().and_then(extract_text)
            }
            _ => None,
        }
    })
}

fn extract_text(data: &Value) -> Option<String> {
    if let Some(text) = data.as_str() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    for key in ["answer", "text", "content"] {
        if let Some(text) = data.get(key).and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn replan_failure_summary(report: &ExecutionReport, evaluation: &Evaluation) -> String {
    let mut parts = Vec::new();
    if let Some(failed) = report
        .steps
        .iter()
        .rev()
        .find(|record| record.status == StepStatus::Failed)
    {
        parts.push(format!(
            "step {} ({}) failed after {} attempt(s): {}",
            failed.index,
            failed.action,
            failed.attempts,
            failed.error.as_deref().unwrap_or("no error detail")
        ));
    }
    if !evaluation.gaps.is_empty() {
        parts.push(format!("evaluator gaps: {}", evaluation.gaps.join("; ")));
    }
    if parts.is_empty() {
        parts.push(format!(
            "evaluation scored completeness {:.2} below the acceptance threshold",
            evaluation.completeness
        ));
    }
    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer_record(data: Value) -> StepRecord {
        StepRecord {
            index: 1,
            action: StepAction::Answer,
            target: "question".to_string(),
            status: StepStatus::Succeeded,
            success: true,
            url: None,
            duration_ms: 5,
            attempts: 1,
            error: None,
            repeated_failure: false,
            data: Some(data),
        }
    }

    #[test]
    fn candidate_answer_reads_common_payload_shapes() {
        assert_eq!(
            candidate_answer(&[answer_record(json!("plain text"))]),
            Some("plain text".to_string())
        );
        assert_eq!(
            candidate_answer(&[answer_record(json!({ "answer": "from field" }))]),
            Some("from field".to_string())
        );
        assert_eq!(candidate_answer(&[answer_record(json!({ "other": 1 }))]), None);
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&WorkflowPhase::Replanning).unwrap();
        assert_eq!(json, "\"replanning\"");
    }
}
