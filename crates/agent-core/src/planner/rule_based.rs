//! Deterministic fallback planner.
//!
//! Selected when no reasoning provider is configured, and used for the
//! direct-answer fallback once planning retries are exhausted. Heuristics
//! only: URLs named in the task become navigation steps, question-like tasks
//! get a page read plus an answer step.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::{PlannerConfig, PlannerOutcome};
use crate::errors::AgentError;
use crate::model::TaskRequest;
use crate::plan::{Plan, StepAction};
use crate::plan_validator::PlanValidator;

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("url pattern compiles"));

const QUESTION_WORDS: &[&str] = &[
    "what", "which", "who", "when", "where", "how", "why", "find", "tell", "list", "read",
    "compare",
];

/// Heuristic planner producing plans without any provider call.
#[derive(Debug, Clone)]
pub struct RulePlanner {
    config: PlannerConfig,
}

impl RulePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Draft a plan from the request text alone.
    pub fn draft_plan(&self, request: &TaskRequest) -> Result<PlannerOutcome, AgentError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AgentError::invalid_request("task query cannot be empty"));
        }

        let mut plan = Plan::new(query);
        let mut explanations = Vec::new();

        let urls = if self.config.auto_navigate {
            detect_urls(query)
        } else {
            Vec::new()
        };
        for addr in urls.iter().take(self.config.max_steps) {
            let step = plan.push_step(StepAction::Navigate, addr.clone());
            step.reasoning = "The task names this address explicitly.".to_string();
            step.expected_outcome = format!("The browser is on {addr}");
            step.validation_criteria = format!("Current URL starts with {addr}");
            explanations.push(format!("Navigate to {addr} (found in the task text)"));
        }

        let wants_content = wants_page_content(query);
        if wants_content
            && !plan.steps.is_empty()
            && request.context.allows_tool(StepAction::GetPageContext.as_str())
        {
            let step = plan.push_step(StepAction::GetPageContext, "main content");
            step.reasoning = "The task asks about page content.".to_string();
            step.expected_outcome = "The page text is captured for answering.".to_string();
            step.validation_criteria = "Captured text is non-empty".to_string();
            explanations.push("Read the page content before answering".to_string());
        }

        if (wants_content || plan.steps.is_empty())
            && request.context.allows_tool(StepAction::Answer.as_str())
        {
            if plan.steps.is_empty() {
                explanations.push("No URL detected; answering directly".to_string());
            } else {
                explanations.push("Compose the final answer from gathered context".to_string());
            }
            let step = plan.push_step(StepAction::Answer, query);
            step.reasoning = "The task expects a textual result.".to_string();
            step.expected_outcome = "An answer addressing the task is produced.".to_string();
            step.validation_criteria = "Answer text is non-empty".to_string();
        }

        if plan.steps.is_empty() {
            // Registry offered nothing usable; emit the answer step anyway and
            // let execution classify it per step.
            let step = plan.push_step(StepAction::Answer, query);
            step.reasoning = "No registered tool matches the task.".to_string();
            explanations.push("No matching tools; answering directly".to_string());
        }

        plan.estimated_steps = plan.steps.len() as u32;
        plan.complexity_score = (plan.steps.len() as f64 / 10.0).min(1.0);
        plan.confidence = if urls.is_empty() { 0.35 } else { 0.6 };

        PlanValidator::default()
            .validate(&mut plan)
            .map_err(|issue| AgentError::PlanningSchema(issue.to_string()))?;

        Ok(PlannerOutcome { plan, explanations })
    }

    /// Single-step plan that answers directly without touching the browser.
    pub fn direct_answer_plan(&self, request: &TaskRequest) -> PlannerOutcome {
        let query = request.query.trim();
        let mut plan = Plan::new(query);
        let step = plan.push_step(StepAction::Answer, query);
        step.reasoning = "Planning fell back to answering directly.".to_string();
        step.expected_outcome = "A best-effort answer is produced.".to_string();
        step.validation_criteria = "Answer text is non-empty".to_string();
        plan.estimated_steps = 1;
        plan.complexity_score = 0.1;
        plan.confidence = 0.35;
        PlannerOutcome {
            plan,
            explanations: vec!["Fell back to a single-step direct answer".to_string()],
        }
    }
}

fn detect_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for found in URL_PATTERN.find_iter(text) {
        let trimmed = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\''])
            .to_string();
        if Url::parse(&trimmed).is_ok() && !urls.contains(&trimmed) {
            urls.push(trimmed);
        }
    }
    urls
}

fn wants_page_content(query: &str) -> bool {
    let lower = query.to_ascii_lowercase();
    if lower.trim_end().ends_with('?') {
        return true;
    }
    if lower.contains("summar") || lower.contains("extract") {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| QUESTION_WORDS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_and_trims_urls() {
        let urls = detect_urls("Go to https://example.com/docs, then report back.");
        assert_eq!(urls, vec!["https://example.com/docs".to_string()]);
    }

    #[test]
    fn deduplicates_repeated_urls() {
        let urls = detect_urls("https://example.com and again https://example.com");
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn question_detection() {
        assert!(wants_page_content("What is on the front page?"));
        assert!(wants_page_content("summarize https://example.com"));
        assert!(!wants_page_content("Navigate to https://example.com"));
    }
}
