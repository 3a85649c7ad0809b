//! Run policy configuration for the workflow state machine.
//!
//! The replanning-cycle bound, critical-step classification, retry budgets,
//! and the global-timeout outcome are all configuration rather than
//! hard-coded thresholds.

use std::time::Duration;

use agent_core::StepAction;

/// What a global-timeout expiry does to the run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Conclude with the deterministic fallback summary as a degraded
    /// success.
    DegradedSuccess,
    /// Conclude as failed, still attaching the fallback summary.
    Fail,
}

/// Per-step execution policy.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Attempts per step including the first try.
    pub max_attempts: u8,
    /// Budget for a single tool invocation.
    pub tool_timeout: Duration,
    /// Actions whose failure precludes meaningful continuation.
    pub critical_actions: Vec<StepAction>,
    /// Restrict the critical classification to the first plan step.
    pub critical_first_step_only: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            tool_timeout: Duration::from_secs(30),
            critical_actions: vec![StepAction::Navigate],
            critical_first_step_only: true,
        }
    }
}

impl ExecutionPolicy {
    /// Whether a failure of this step short-circuits the rest of the plan.
    pub fn is_critical(&self, step_index: u32, action: &StepAction) -> bool {
        if self.critical_first_step_only && step_index != 1 {
            return false;
        }
        self.critical_actions.contains(action)
    }
}

/// Workflow-level policy: phase thresholds, retry budgets, and timeouts.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Completeness at or above which the evaluator's verdict is accepted.
    pub completeness_threshold: f64,
    /// Replanning cycles allowed before settling for a best-effort answer.
    pub max_replan_cycles: u32,
    /// Planner retries after a transient provider failure.
    pub max_plan_retries: u32,
    /// Whether exhausted planning retries fall back to a single-step
    /// direct-answer plan instead of failing the run.
    pub fallback_direct_answer: bool,
    /// Budget for each reasoning-provider call.
    pub provider_timeout: Duration,
    /// Wall-clock budget for the entire run.
    pub run_timeout: Duration,
    /// Outcome forced when the run timeout fires.
    pub on_timeout: TimeoutOutcome,
    pub execution: ExecutionPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            completeness_threshold: 0.7,
            max_replan_cycles: 2,
            max_plan_retries: 1,
            fallback_direct_answer: false,
            provider_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(300),
            on_timeout: TimeoutOutcome::DegradedSuccess,
            execution: ExecutionPolicy::default(),
        }
    }
}

impl WorkflowConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight budgets for tests.
    pub fn minimal() -> Self {
        Self {
            completeness_threshold: 0.7,
            max_replan_cycles: 1,
            max_plan_retries: 0,
            fallback_direct_answer: false,
            provider_timeout: Duration::from_millis(500),
            run_timeout: Duration::from_secs(5),
            on_timeout: TimeoutOutcome::DegradedSuccess,
            execution: ExecutionPolicy {
                max_attempts: 2,
                tool_timeout: Duration::from_millis(250),
                critical_actions: vec![StepAction::Navigate],
                critical_first_step_only: true,
            },
        }
    }

    /// Builder: set the acceptance threshold.
    pub fn threshold(mut self, value: f64) -> Self {
        self.completeness_threshold = value;
        self
    }

    /// Builder: set the replanning-cycle bound.
    pub fn replan_cycles(mut self, cycles: u32) -> Self {
        self.max_replan_cycles = cycles;
        self
    }

    /// Builder: set planner retries.
    pub fn plan_retries(mut self, retries: u32) -> Self {
        self.max_plan_retries = retries;
        self
    }

    /// Builder: enable the direct-answer planning fallback.
    pub fn with_direct_answer_fallback(mut self) -> Self {
        self.fallback_direct_answer = true;
        self
    }

    /// Builder: set the global run budget.
    pub fn run_timeout(mut self, budget: Duration) -> Self {
        self.run_timeout = budget;
        self
    }

    /// Builder: set the global-timeout outcome.
    pub fn on_timeout(mut self, outcome: TimeoutOutcome) -> Self {
        self.on_timeout = outcome;
        self
    }

    /// Builder: set the per-step execution policy.
    pub fn execution(mut self, policy: ExecutionPolicy) -> Self {
        self.execution = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.completeness_threshold, 0.7);
        assert_eq!(config.max_replan_cycles, 2);
        assert_eq!(config.execution.max_attempts, 2);
        assert_eq!(config.on_timeout, TimeoutOutcome::DegradedSuccess);
    }

    #[test]
    fn builder_overrides() {
        let config = WorkflowConfig::new()
            .threshold(0.9)
            .replan_cycles(0)
            .run_timeout(Duration::from_secs(10))
            .on_timeout(TimeoutOutcome::Fail);
        assert_eq!(config.completeness_threshold, 0.9);
        assert_eq!(config.max_replan_cycles, 0);
        assert_eq!(config.run_timeout, Duration::from_secs(10));
        assert_eq!(config.on_timeout, TimeoutOutcome::Fail);
    }

    #[test]
    fn critical_classification_defaults_to_first_navigation() {
        let policy = ExecutionPolicy::default();
        assert!(policy.is_critical(1, &StepAction::Navigate));
        assert!(!policy.is_critical(2, &StepAction::Navigate));
        assert!(!policy.is_critical(1, &StepAction::Click));
    }

    #[test]
    fn critical_classification_can_cover_all_steps() {
        let policy = ExecutionPolicy {
            critical_first_step_only: false,
            critical_actions: vec![StepAction::Navigate, StepAction::Click],
            ..ExecutionPolicy::default()
        };
        assert!(policy.is_critical(3, &StepAction::Click));
    }
}
