//! Prompt assembly for the reasoning-backed stages.
//!
//! The instruction contracts are fixed: each stage requests a structured
//! response matching the schema it hands to the provider.

use crate::model::TaskRequest;
use crate::plan::Plan;

pub(crate) const PLANNING_SYSTEM_PROMPT: &str = "\
You are the planning stage of a browser automation agent. Given a task, \
produce an ordered list of browser action steps. For every step provide the \
action name, its target (URL, CSS selector, or text), your reasoning, the \
expected outcome, and concrete validation criteria. Also report \
estimated_steps (an integer of at least 1), complexity_score in [0,1], and \
confidence in [0,1]. Only use the action names listed as available. Respond \
with JSON matching the provided schema and nothing else.";

pub(crate) const EVALUATION_SYSTEM_PROMPT: &str = "\
You are the evaluation stage of a browser automation agent. Score how \
completely the recorded trajectory satisfies the objective: completeness in \
[0,1], at most five outstanding gaps, and, when completeness is low, an \
optimized_query rephrasing the objective for another planning cycle. Respond \
with JSON matching the provided schema and nothing else.";

pub(crate) const ANALYSIS_SYSTEM_PROMPT: &str = "\
You are the failure-analysis stage of a browser automation agent. Given the \
chronological diary of a failed run, explain what happened (recap), the most \
likely root cause (blame), and what to change next time (improvement). \
Respond with JSON matching the provided schema and nothing else.";

pub(crate) fn planning_user_prompt(request: &TaskRequest, max_steps: usize) -> String {
    let mut prompt = format!("Task: {}\n", request.query.trim());
    if let Some(url) = request.context.current_url.as_deref() {
        prompt.push_str(&format!("Current URL: {url}\n"));
    }
    if !request.context.available_tools.is_empty() {
        prompt.push_str(&format!(
            "Available actions: {}\n",
            request.context.available_tools.join(", ")
        ));
    }
    for constraint in &request.constraints {
        prompt.push_str(&format!("Constraint: {constraint}\n"));
    }
    for hint in &request.context.memory_hints {
        prompt.push_str(&format!("Note from earlier cycles: {hint}\n"));
    }
    prompt.push_str(&format!("Emit at most {max_steps} steps.\n"));
    prompt
}

pub(crate) fn replanning_user_prompt(
    request: &TaskRequest,
    previous: &Plan,
    failure_summary: &str,
    max_steps: usize,
) -> String {
    let mut prompt = planning_user_prompt(request, max_steps);
    prompt.push_str(&format!(
        "\nThe previous plan ({} step(s) toward \"{}\") did not succeed.\n",
        previous.steps.len(),
        previous.objective
    ));
    prompt.push_str(&format!("Failure summary: {failure_summary}\n"));
    prompt.push_str(
        "Generate an alternative plan that avoids this failure while still achieving the goal.\n",
    );
    prompt
}

pub(crate) fn evaluation_user_prompt(
    objective: &str,
    diary: &[String],
    candidate_answer: Option<&str>,
) -> String {
    let mut prompt = format!("Objective: {objective}\n\nTrajectory diary:\n");
    if diary.is_empty() {
        prompt.push_str("(no steps recorded)\n");
    }
    for entry in diary {
        prompt.push_str(&format!("- {entry}\n"));
    }
    match candidate_answer {
        Some(answer) => prompt.push_str(&format!("\nCandidate answer: {answer}\n")),
        None => prompt.push_str("\nNo candidate answer was produced.\n"),
    }
    prompt
}

pub(crate) fn analysis_user_prompt(
    diary: &[String],
    original_query: &str,
    final_answer: Option<&str>,
    evaluator_feedback: Option<&str>,
) -> String {
    let mut prompt = format!("Original task: {original_query}\n\nChronological diary:\n");
    if diary.is_empty() {
        prompt.push_str("(no steps recorded)\n");
    }
    for entry in diary {
        prompt.push_str(&format!("- {entry}\n"));
    }
    match final_answer {
        Some(answer) => prompt.push_str(&format!("\nFinal answer produced: {answer}\n")),
        None => prompt.push_str("\nNo final answer was produced.\n"),
    }
    if let Some(feedback) = evaluator_feedback {
        prompt.push_str(&format!("Evaluator feedback: {feedback}\n"));
    }
    prompt
}
