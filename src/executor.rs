//! Execution stage: walks a validated plan strictly in order, dispatching
//! tool callables and streaming lifecycle events through the run's broker.
//!
//! Plans are never mutated here. Each step's final outcome is appended to an
//! owned record log; `WorkflowState.executed_steps` is the derived read-only
//! projection of that log.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agent_core::{AgentError, Plan, PlanStep, StepAction, StepStatus};
use webpilot_core_types::ToolCallId;
use webpilot_event_broker::{ProgressBroker, ToolExecutionEvent, ToolPhase};

use crate::config::ExecutionPolicy;
use crate::tools::{ToolOutcome, ToolRegistry};

/// Final outcome recorded for one plan step. Only the last attempt's outcome
/// is kept, even when the step was retried.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: u32,
    pub action: StepAction,
    pub target: String,
    pub status: StepStatus,
    pub success: bool,
    /// URL reached by a successful navigation step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub duration_ms: u64,
    pub attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every attempt failed with an identical error, a hint that the run is
    /// stuck in a loop.
    pub repeated_failure: bool,
    /// Payload returned by the tool; answers and page context flow through
    /// here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepRecord {
    fn skipped(step: &PlanStep) -> Self {
        Self {
            index: step.index,
            action: step.action.clone(),
            target: step.target.clone(),
            status: StepStatus::Skipped,
            success: false,
            url: None,
            duration_ms: 0,
            attempts: 0,
            error: None,
            repeated_failure: false,
            data: None,
        }
    }
}

/// Aggregate result of walking one plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub steps: Vec<StepRecord>,
    /// True when every executed step succeeded.
    pub success: bool,
    /// Reason, when a critical step failure short-circuited the plan.
    pub critical_failure: Option<String>,
}

impl ExecutionReport {
    pub fn succeeded_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|record| record.status == StepStatus::Succeeded)
            .count()
    }
}

/// Execute the plan's steps strictly in order.
///
/// Non-critical failures leave later steps eligible to run; a critical
/// failure marks the remaining steps skipped and is reported for the
/// orchestrator to route into failure analysis. The only error this function
/// returns is [`AgentError::Cancelled`].
pub async fn execute_plan(
    plan: &Plan,
    registry: &ToolRegistry,
    broker: &ProgressBroker,
    policy: &ExecutionPolicy,
    cancel: &CancellationToken,
    diary: &mut Vec<String>,
) -> Result<ExecutionReport, AgentError> {
    let mut records = Vec::with_capacity(plan.steps.len());
    let mut critical_failure: Option<String> = None;

    for step in &plan.steps {
        if critical_failure.is_some() {
            diary.push(format!(
                "Step {}: {} skipped after a critical failure.",
                step.index, step.action
            ));
            records.push(StepRecord::skipped(step));
            continue;
        }
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let record = execute_step(step, registry, broker, policy, cancel).await?;
        diary.push(narrate(&record));

        if !record.success && policy.is_critical(step.index, &step.action) {
            let reason = format!(
                "critical step {} ({}) failed: {}",
                step.index,
                step.action,
                record.error.as_deref().unwrap_or("no error detail")
            );
            warn!(step = step.index, "critical step failure short-circuits the plan");
            critical_failure = Some(reason);
        }

        records.push(record);
    }

    let success = critical_failure.is_none()
        && records
            .iter()
            .all(|record| record.status == StepStatus::Succeeded);
    if success {
        info!(steps = records.len(), "plan executed successfully");
    }

    Ok(ExecutionReport {
        steps: records,
        success,
        critical_failure,
    })
}

async fn execute_step(
    step: &PlanStep,
    registry: &ToolRegistry,
    broker: &ProgressBroker,
    policy: &ExecutionPolicy,
    cancel: &CancellationToken,
) -> Result<StepRecord, AgentError> {
    let started = Instant::now();

    let Some(tool) = registry.get(&step.action) else {
        let err = AgentError::unknown_tool(step.action.as_str());
        warn!(step = step.index, "{err}");
        return Ok(StepRecord {
            index: step.index,
            action: step.action.clone(),
            target: step.target.clone(),
            status: StepStatus::Failed,
            success: false,
            url: None,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: 0,
            error: Some(err.to_string()),
            repeated_failure: false,
            data: None,
        });
    };

    let tool_name = step.action.as_str().to_string();
    let total_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<String> = None;
    let mut repeated_failure = false;

    for attempt in 1..=total_attempts {
        let call_id = ToolCallId::new();
        broker.publish(ToolExecutionEvent::new(
            call_id.clone(),
            &tool_name,
            ToolPhase::Starting,
        ));

        // `executing` goes out immediately before the awaited call so
        // subscribers can distinguish queued work from in-flight work.
        broker.publish(ToolExecutionEvent::new(
            call_id.clone(),
            &tool_name,
            ToolPhase::Executing,
        ));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                broker.publish(
                    ToolExecutionEvent::new(call_id, &tool_name, ToolPhase::Error)
                        .with_error("run cancelled"),
                );
                return Err(AgentError::Cancelled);
            }
            result = timeout(policy.tool_timeout, tool.call(&step.target, policy.tool_timeout)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => ToolOutcome::fail(
                        AgentError::timeout(
                            format!("tool '{tool_name}'"),
                            policy.tool_timeout.as_millis() as u64,
                        )
                        .to_string(),
                    ),
                }
            }
        };

        if outcome.success {
            broker.publish(ToolExecutionEvent::new(
                call_id,
                &tool_name,
                ToolPhase::Completed,
            ));
            let url = match step.action {
                StepAction::Navigate => Some(step.target.clone()),
                _ => None,
            };
            return Ok(StepRecord {
                index: step.index,
                action: step.action.clone(),
                target: step.target.clone(),
                status: StepStatus::Succeeded,
                success: true,
                url,
                duration_ms: started.elapsed().as_millis() as u64,
                attempts: attempt,
                error: None,
                repeated_failure: false,
                data: outcome.data,
            });
        }

        let message = outcome
            .error
            .unwrap_or_else(|| "tool reported failure without detail".to_string());
        broker.publish(
            ToolExecutionEvent::new(call_id, &tool_name, ToolPhase::Error)
                .with_error(message.clone()),
        );
        repeated_failure = last_error.as_deref() == Some(message.as_str());
        last_error = Some(message);
        if attempt < total_attempts {
            debug!(step = step.index, attempt, "retrying step with the same target");
        }
    }

    Ok(StepRecord {
        index: step.index,
        action: step.action.clone(),
        target: step.target.clone(),
        status: StepStatus::Failed,
        success: false,
        url: None,
        duration_ms: started.elapsed().as_millis() as u64,
        attempts: total_attempts,
        error: last_error,
        repeated_failure,
        data: None,
    })
}

fn narrate(record: &StepRecord) -> String {
    match record.status {
        StepStatus::Succeeded => format!(
            "Step {}: {} '{}' succeeded in {}ms.",
            record.index, record.action, record.target, record.duration_ms
        ),
        StepStatus::Failed if record.attempts == 0 => format!(
            "Step {}: no tool registered for action '{}'.",
            record.index, record.action
        ),
        StepStatus::Failed => {
            let mut line = format!(
                "Step {}: {} '{}' failed after {} attempt(s): {}.",
                record.index,
                record.action,
                record.target,
                record.attempts,
                record.error.as_deref().unwrap_or("no error detail")
            );
            if record.repeated_failure {
                line.push_str(" The same error repeated on every attempt.");
            }
            line
        }
        StepStatus::Skipped => format!(
            "Step {}: {} skipped after a critical failure.",
            record.index, record.action
        ),
        StepStatus::Pending | StepStatus::Running => format!(
            "Step {}: {} '{}' is {:?}.",
            record.index, record.action, record.target, record.status
        ),
    }
}
