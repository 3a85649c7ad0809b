//! Structural validation and normalization of planner output.

use thiserror::Error;

use crate::plan::{Plan, StepAction};

/// Structural problems detected in planner output.
#[derive(Debug, Error, Clone)]
pub enum PlanValidationIssue {
    #[error("plan contains no steps")]
    Empty,

    #[error("step at position {position} has index {found}, expected {expected}")]
    NonContiguousIndex {
        position: usize,
        found: u32,
        expected: u32,
    },

    #[error("step {index} ({action}) must specify a non-empty target")]
    MissingTarget { index: u32, action: String },

    #[error("estimated_steps must be at least 1")]
    ZeroEstimate,
}

/// Validates plan structure and enforces scalar bounds.
///
/// Scores outside `[0, 1]` are clamped rather than rejected; a zero step
/// estimate is repaired to the actual step count unless the validator runs
/// in strict mode.
#[derive(Debug, Clone, Default)]
pub struct PlanValidator {
    strict: bool,
}

impl PlanValidator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Validate and normalize the plan in place.
    pub fn validate(&self, plan: &mut Plan) -> Result<(), PlanValidationIssue> {
        if plan.steps.is_empty() {
            return Err(PlanValidationIssue::Empty);
        }

        for (position, step) in plan.steps.iter().enumerate() {
            let expected = position as u32 + 1;
            if step.index != expected {
                return Err(PlanValidationIssue::NonContiguousIndex {
                    position,
                    found: step.index,
                    expected,
                });
            }
            if step.target.trim().is_empty() && target_required(&step.action) {
                return Err(PlanValidationIssue::MissingTarget {
                    index: step.index,
                    action: step.action.as_str().to_string(),
                });
            }
        }

        plan.complexity_score = clamp_unit(plan.complexity_score);
        plan.confidence = clamp_unit(plan.confidence);

        if plan.estimated_steps == 0 {
            if self.strict {
                return Err(PlanValidationIssue::ZeroEstimate);
            }
            plan.estimated_steps = plan.steps.len() as u32;
        }

        Ok(())
    }
}

/// Actions that are meaningless without a target argument.
fn target_required(action: &StepAction) -> bool {
    matches!(
        action,
        StepAction::Navigate | StepAction::Click | StepAction::TypeText
    )
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepAction;

    #[test]
    fn clamps_out_of_range_scores() {
        let mut plan = Plan::new("demo");
        plan.push_step(StepAction::Navigate, "https://example.com");
        plan.confidence = 1.7;
        plan.complexity_score = -0.3;

        PlanValidator::default().validate(&mut plan).unwrap();
        assert_eq!(plan.confidence, 1.0);
        assert_eq!(plan.complexity_score, 0.0);
    }

    #[test]
    fn nan_scores_clamp_to_zero() {
        let mut plan = Plan::new("demo");
        plan.push_step(StepAction::Answer, "done");
        plan.confidence = f64::NAN;

        PlanValidator::default().validate(&mut plan).unwrap();
        assert_eq!(plan.confidence, 0.0);
    }
}
