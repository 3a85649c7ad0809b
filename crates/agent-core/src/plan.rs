//! Plan data model: the validated, ordered action sequence for one planning
//! cycle. Plans are immutable once [`crate::PlanValidator`] accepts them;
//! execution records step outcomes in its own log instead of mutating steps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use webpilot_core_types::PlanId;

/// Browser action named by a plan step.
///
/// Unknown names survive deserialization as [`StepAction::Other`] so the
/// execution stage can classify them per step instead of rejecting the whole
/// plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepAction {
    Navigate,
    Click,
    TypeText,
    Scroll,
    GetPageContext,
    Answer,
    Other(String),
}

impl StepAction {
    /// Canonical wire name for the action.
    pub fn as_str(&self) -> &str {
        match self {
            StepAction::Navigate => "navigate",
            StepAction::Click => "click",
            StepAction::TypeText => "type_text",
            StepAction::Scroll => "scroll",
            StepAction::GetPageContext => "get_page_context",
            StepAction::Answer => "answer",
            StepAction::Other(name) => name,
        }
    }

    /// Parse a wire name, tolerating the aliases LLM planners tend to emit.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "navigate" | "goto" | "open" => StepAction::Navigate,
            "click" => StepAction::Click,
            "type_text" | "type" | "fill" | "input" => StepAction::TypeText,
            "scroll" => StepAction::Scroll,
            "get_page_context" | "observe" | "read_page" => StepAction::GetPageContext,
            "answer" | "respond" => StepAction::Answer,
            other => StepAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ActionVisitor;

        impl<'de> Visitor<'de> for ActionVisitor {
            type Value = StepAction;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an action name string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<StepAction, E> {
                Ok(StepAction::parse(value))
            }
        }

        deserializer.deserialize_str(ActionVisitor)
    }
}

/// Lifecycle of one plan step, recorded on execution step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// One action within a validated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based position, unique within the plan; execution order.
    pub index: u32,
    pub action: StepAction,
    /// Action-specific argument: URL, selector, or text.
    pub target: String,
    /// Planner rationale; consumed by evaluation and diagnosis, not by
    /// execution.
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub validation_criteria: String,
}

impl PlanStep {
    pub fn new(index: u32, action: StepAction, target: impl Into<String>) -> Self {
        Self {
            index,
            action,
            target: target.into(),
            reasoning: String::new(),
            expected_outcome: String::new(),
            validation_criteria: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = outcome.into();
        self
    }

    pub fn with_validation(mut self, criteria: impl Into<String>) -> Self {
        self.validation_criteria = criteria.into();
        self
    }
}

/// Validated, ordered sequence of intended browser actions for one planning
/// cycle. Owned exclusively by the orchestrator for that cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    /// The task being solved.
    pub objective: String,
    pub steps: Vec<PlanStep>,
    pub estimated_steps: u32,
    /// In `[0, 1]` once validated.
    pub complexity_score: f64,
    /// In `[0, 1]` once validated; out-of-range planner output is clamped.
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            id: PlanId::new(),
            objective: objective.into(),
            steps: Vec::new(),
            estimated_steps: 1,
            complexity_score: 0.5,
            confidence: 0.5,
            created_at: Utc::now(),
        }
    }

    /// Append a step, assigning the next 1-based index.
    pub fn push_step(&mut self, action: StepAction, target: impl Into<String>) -> &mut PlanStep {
        let index = self.steps.len() as u32 + 1;
        self.steps.push(PlanStep::new(index, action, target));
        self.steps.last_mut().expect("step just pushed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_wire_names() {
        for action in [
            StepAction::Navigate,
            StepAction::Click,
            StepAction::TypeText,
            StepAction::Scroll,
            StepAction::GetPageContext,
            StepAction::Answer,
        ] {
            assert_eq!(StepAction::parse(action.as_str()), action);
        }
    }

    #[test]
    fn unknown_action_is_preserved() {
        let action = StepAction::parse("hover");
        assert_eq!(action, StepAction::Other("hover".to_string()));
        assert_eq!(action.as_str(), "hover");
    }

    #[test]
    fn action_deserializes_from_json_string() {
        let action: StepAction = serde_json::from_str("\"navigate\"").unwrap();
        assert_eq!(action, StepAction::Navigate);
        let other: StepAction = serde_json::from_str("\"drag_and_drop\"").unwrap();
        assert_eq!(other, StepAction::Other("drag_and_drop".to_string()));
    }

    #[test]
    fn push_step_assigns_contiguous_indices() {
        let mut plan = Plan::new("demo");
        plan.push_step(StepAction::Navigate, "https://example.com");
        plan.push_step(StepAction::Answer, "");
        let indices: Vec<u32> = plan.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
