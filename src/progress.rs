//! Progress-record projection consumed by queue-style UIs.
//!
//! Records are derived from the orchestrator's state on demand; nothing here
//! mutates plans or steps.

use serde::{Deserialize, Serialize};

use agent_core::StepStatus;

use crate::workflow::{WorkflowPhase, WorkflowState};

/// Status vocabulary of the task-queue contract. Consumers must treat
/// unknown values tolerantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// One logical task surfaced to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ProgressStatus,
}

/// Derive a headline record for the run plus one record per planned step.
///
/// Steps that were skipped after a critical failure surface as pending,
/// since they never ran.
pub fn progress_records(state: &WorkflowState) -> Vec<ProgressRecord> {
    let mut records = Vec::new();

    records.push(ProgressRecord {
        id: "run".to_string(),
        title: state.query.clone(),
        description: state.final_answer.clone(),
        status: match state.phase {
            WorkflowPhase::Completed => ProgressStatus::Completed,
            WorkflowPhase::Failed => ProgressStatus::Error,
            _ => ProgressStatus::InProgress,
        },
    });

    let Some(plan) = &state.current_plan else {
        return records;
    };

    for step in &plan.steps {
        let executed = state
            .executed_steps
            .iter()
            .rev()
            .find(|record| record.index == step.index);
        let status = match executed.map(|record| record.status) {
            Some(StepStatus::Succeeded) => ProgressStatus::Completed,
            Some(StepStatus::Failed) => ProgressStatus::Error,
            Some(StepStatus::Running) => ProgressStatus::InProgress,
            Some(StepStatus::Pending) | Some(StepStatus::Skipped) | None => {
                ProgressStatus::Pending
            }
        };
        records.push(ProgressRecord {
            id: format!("step-{}", step.index),
            title: format!("{} {}", step.action, step.target).trim().to_string(),
            description: (!step.reasoning.is_empty()).then(|| step.reasoning.clone()),
            status,
        });
    }

    records
}
