//! End-to-end workflow scenarios against mock providers and tools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use agent_core::{Capabilities, MockProvider, ProviderError, StepStatus};
use webpilot_cli::{
    ExecutionPolicy, FnTool, TimeoutOutcome, ToolOutcome, ToolRegistry, WorkflowConfig,
    WorkflowPhase, WorkflowRunner,
};
use webpilot_event_broker::ToolPhase;

fn navigate_ok_registry() -> ToolRegistry {
    ToolRegistry::new().with_tool(
        "navigate",
        FnTool::from_sync(|target| ToolOutcome::ok(json!({ "url": target }))),
    )
}

fn answer_registry() -> ToolRegistry {
    ToolRegistry::new().with_tool(
        "answer",
        FnTool::from_sync(|target| ToolOutcome::ok(json!({ "answer": target }))),
    )
}

fn slow_navigate_registry(delay: Duration) -> ToolRegistry {
    ToolRegistry::new().with_tool(
        "navigate",
        FnTool::new(move |_| {
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                ToolOutcome::ok_empty()
            })
        }),
    )
}

fn single_step_plan_draft(action: &str, target: &str) -> serde_json::Value {
    json!({
        "steps": [ { "action": action, "target": target } ],
        "estimated_steps": 1,
        "complexity_score": 0.1,
        "confidence": 0.8
    })
}

// Scenario A: a navigation-only task against a navigation-only registry
// produces a one-step plan and a successful run.
#[tokio::test]
async fn navigation_task_completes_with_one_step() {
    let runner = WorkflowRunner::offline(
        Arc::new(navigate_ok_registry()),
        WorkflowConfig::minimal(),
    );

    let (result, state) = runner
        .run_with_state("Navigate to https://example.com")
        .await;

    assert!(result.success);
    assert_eq!(result.steps, 1);
    assert_eq!(result.final_url.as_deref(), Some("https://example.com"));
    assert!(result.error.is_none());
    assert!(result.final_answer.is_some());

    let plan = state.current_plan.expect("plan was produced");
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].action.as_str(), "navigate");
    assert_eq!(plan.steps[0].target, "https://example.com");
    assert_eq!(state.phase, WorkflowPhase::Completed);
}

// The broker's recorded phase sequence per tool call id is a prefix of
// [starting, executing, terminal], never out of order.
#[tokio::test]
async fn broker_history_keeps_phase_order_per_call_id() {
    let runner = WorkflowRunner::offline(
        Arc::new(navigate_ok_registry()),
        WorkflowConfig::minimal(),
    );
    let broker = runner.broker();

    let result = runner.run("Navigate to https://example.com").await;
    assert!(result.success);

    let mut per_call: HashMap<String, Vec<ToolPhase>> = HashMap::new();
    for event in broker.history() {
        per_call
            .entry(event.tool_call_id.0.clone())
            .or_default()
            .push(event.phase);
    }
    assert!(!per_call.is_empty());
    for phases in per_call.values() {
        let expected = [ToolPhase::Starting, ToolPhase::Executing, ToolPhase::Completed];
        assert!(phases.len() <= expected.len());
        for (seen, expected) in phases.iter().zip(expected.iter()) {
            assert_eq!(seen, expected);
        }
        // A terminal phase, if present, is the last one.
        for phase in &phases[..phases.len().saturating_sub(1)] {
            assert!(!phase.is_terminal());
        }
    }
    assert_eq!(broker.tool_usage_counts().get("navigate"), Some(&1));
}

// Scenario B: a permanently failing navigation exhausts its retries, the
// critical-step policy fails the run, and diagnosis still produces a full
// report with the provider unavailable.
#[tokio::test]
async fn critical_navigation_failure_fails_the_run_with_diagnosis() {
    let registry = ToolRegistry::new().with_tool(
        "navigate",
        FnTool::from_sync(|_| ToolOutcome::fail("connection refused")),
    );
    let runner = WorkflowRunner::offline(Arc::new(registry), WorkflowConfig::minimal());

    let (result, state) = runner
        .run_with_state("Navigate to https://example.com")
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("critical step 1"));
    assert_eq!(state.phase, WorkflowPhase::Failed);

    let record = &state.executed_steps[0];
    assert_eq!(record.status, StepStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert!(record.repeated_failure);

    let report = state.failure_report.expect("diagnosis ran");
    assert!(!report.recap.is_empty());
    assert!(!report.blame.is_empty());
    assert!(!report.improvement.is_empty());
}

// Scenario C: a rejected first evaluation triggers exactly one replanning
// cycle, after which the run completes.
#[tokio::test]
async fn rejected_evaluation_replans_once_then_completes() {
    let provider = Arc::new(MockProvider::new());
    provider.push_value(single_step_plan_draft("answer", "first attempt summary"));
    provider.push_value(json!({
        "completeness": 0.4,
        "gaps": ["missing the requested detail"],
        "optimized_query": "summarize the page with the requested detail"
    }));
    provider.push_value(single_step_plan_draft("answer", "second attempt summary"));
    provider.push_value(json!({ "completeness": 0.9, "gaps": [] }));

    let runner = WorkflowRunner::new(
        Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>,
        Arc::new(answer_registry()),
        WorkflowConfig::minimal().replan_cycles(2),
    );

    let (result, state) = runner.run_with_state("Summarize the page").await;

    assert!(result.success);
    assert_eq!(state.replan_cycles, 1);
    assert_eq!(result.final_answer.as_deref(), Some("second attempt summary"));
    let replanning_entries = state
        .diary
        .iter()
        .filter(|entry| entry.starts_with("Replanning cycle"))
        .count();
    assert_eq!(replanning_entries, 1);
    assert_eq!(provider.calls(), 4);
}

// Exhausted replanning cycles settle for a best-effort answer: the run is a
// degraded completion, not a failure, and diagnosis is attached.
#[tokio::test]
async fn exhausted_replanning_cycles_complete_degraded() {
    let provider = Arc::new(MockProvider::new());
    provider.push_value(single_step_plan_draft("answer", "only attempt"));
    provider.push_value(json!({ "completeness": 0.2, "gaps": ["not even close"] }));
    // Diagnosis provider response for the degraded conclusion.
    provider.push_value(json!({
        "recap": "One answer step ran but the evaluator rejected it.",
        "blame": "The answer lacked the requested detail.",
        "improvement": "Gather page context before answering."
    }));

    let runner = WorkflowRunner::new(
        Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>,
        Arc::new(answer_registry()),
        WorkflowConfig::minimal().replan_cycles(0),
    );

    let (result, state) = runner.run_with_state("Summarize the page").await;

    assert!(result.success);
    assert_eq!(state.phase, WorkflowPhase::Completed);
    assert_eq!(state.replan_cycles, 0);
    let report = state.failure_report.expect("diagnosis ran for rejected output");
    assert_eq!(report.blame, "The answer lacked the requested detail.");
}

// Scenario D: the global timeout fires mid-execution and the run concludes
// from the recorded trajectory without any further provider call.
#[tokio::test]
async fn global_timeout_concludes_without_further_provider_calls() {
    let provider = Arc::new(MockProvider::new());
    provider.push_value(single_step_plan_draft("navigate", "https://example.com"));

    let config = WorkflowConfig::minimal()
        .run_timeout(Duration::from_millis(200))
        .execution(ExecutionPolicy {
            max_attempts: 1,
            tool_timeout: Duration::from_secs(30),
            ..ExecutionPolicy::default()
        });
    let runner = WorkflowRunner::new(
        Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>,
        Arc::new(slow_navigate_registry(Duration::from_secs(30))),
        config,
    );

    let started = Instant::now();
    let (result, state) = runner
        .run_with_state("Navigate to https://example.com")
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    // Degraded success by default; only the planning call went out.
    assert!(result.success);
    assert_eq!(provider.calls(), 1);
    assert_eq!(state.phase, WorkflowPhase::Completed);
    assert!(result
        .final_answer
        .as_deref()
        .unwrap()
        .starts_with("Completed 0 of 0 recorded step(s)"));
}

#[tokio::test]
async fn global_timeout_can_be_configured_to_fail() {
    let config = WorkflowConfig::minimal()
        .run_timeout(Duration::from_millis(200))
        .on_timeout(TimeoutOutcome::Fail)
        .execution(ExecutionPolicy {
            max_attempts: 1,
            tool_timeout: Duration::from_secs(30),
            ..ExecutionPolicy::default()
        });
    let runner = WorkflowRunner::offline(
        Arc::new(slow_navigate_registry(Duration::from_secs(30))),
        config,
    );

    let (result, state) = runner
        .run_with_state("Navigate to https://example.com")
        .await;

    assert!(!result.success);
    assert_eq!(state.phase, WorkflowPhase::Failed);
    assert!(result.error.as_deref().unwrap().contains("wall-clock"));
    // The deterministic report was attached without a provider.
    assert!(state.failure_report.is_some());
}

// Evaluation provider failures are fail-open: the run accepts the current
// answer instead of blocking.
#[tokio::test]
async fn evaluation_provider_failure_fails_open() {
    let provider = Arc::new(MockProvider::new());
    provider.push_value(single_step_plan_draft("answer", "the answer"));
    provider.push_error(ProviderError::Transport("evaluator down".to_string()));

    let runner = WorkflowRunner::new(
        Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>,
        Arc::new(answer_registry()),
        WorkflowConfig::minimal(),
    );

    let (result, state) = runner.run_with_state("Answer the question").await;

    assert!(result.success);
    assert_eq!(result.final_answer.as_deref(), Some("the answer"));
    assert!(state
        .diary
        .iter()
        .any(|entry| entry.contains("Evaluator unavailable")));
}

// Transient planning failures are retried in place before giving up.
#[tokio::test]
async fn transient_planning_failure_is_retried() {
    let provider = Arc::new(MockProvider::new());
    provider.push_error(ProviderError::RateLimited);
    provider.push_value(single_step_plan_draft("answer", "after retry"));

    let capabilities = Capabilities {
        llm_planning: true,
        llm_evaluation: false,
        llm_diagnosis: false,
    };
    let mut config = WorkflowConfig::minimal();
    config.max_plan_retries = 1;
    let runner = WorkflowRunner::with_capabilities(
        Some(Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>),
        capabilities,
        Arc::new(answer_registry()),
        config,
    );

    let (result, state) = runner.run_with_state("Answer the question").await;

    assert!(result.success);
    assert_eq!(provider.calls(), 2);
    assert!(state
        .diary
        .iter()
        .any(|entry| entry.contains("Planning attempt 1 failed")));
}

// Schema-invalid planner output is fatal immediately, with no retry.
#[tokio::test]
async fn planning_schema_failure_is_fatal() {
    let provider = Arc::new(MockProvider::new());
    provider.push_value(json!({ "steps": "garbage" }));

    let capabilities = Capabilities {
        llm_planning: true,
        llm_evaluation: false,
        llm_diagnosis: false,
    };
    let mut config = WorkflowConfig::minimal();
    config.max_plan_retries = 3;
    let runner = WorkflowRunner::with_capabilities(
        Some(Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>),
        capabilities,
        Arc::new(answer_registry()),
        config,
    );

    let (result, state) = runner.run_with_state("Answer the question").await;

    assert!(!result.success);
    assert_eq!(provider.calls(), 1);
    assert_eq!(state.phase, WorkflowPhase::Failed);
    assert!(result.error.as_deref().unwrap().contains("schema"));
    assert!(state.failure_report.is_some());
}

// Exhausted planning retries can fall back to a single-step direct answer.
#[tokio::test]
async fn planning_retries_can_fall_back_to_direct_answer() {
    let provider = Arc::new(MockProvider::new());
    provider.push_error(ProviderError::Transport("provider down".to_string()));

    let capabilities = Capabilities {
        llm_planning: true,
        llm_evaluation: false,
        llm_diagnosis: false,
    };
    let config = WorkflowConfig::minimal().with_direct_answer_fallback();
    let runner = WorkflowRunner::with_capabilities(
        Some(Arc::clone(&provider) as Arc<dyn agent_core::ReasoningProvider>),
        capabilities,
        Arc::new(answer_registry()),
        config,
    );

    let (result, state) = runner.run_with_state("Answer the question").await;

    assert!(result.success);
    assert_eq!(result.steps, 1);
    assert_eq!(
        state.current_plan.unwrap().steps[0].action.as_str(),
        "answer"
    );
}

// Cancellation forces Failed with reason Cancelled and skips diagnostics.
#[tokio::test]
async fn cancellation_skips_diagnostics() {
    let runner = WorkflowRunner::offline(
        Arc::new(slow_navigate_registry(Duration::from_secs(30))),
        WorkflowConfig::minimal().run_timeout(Duration::from_secs(60)),
    );
    let cancel = runner.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let (result, state) = runner
        .run_with_state("Navigate to https://example.com")
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert_eq!(state.phase, WorkflowPhase::Failed);
    assert!(result.error.as_deref().unwrap().contains("cancelled"));
    assert!(state.failure_report.is_none());
}

// A non-critical failed step leaves later steps eligible and the run
// completes through fail-open evaluation.
#[tokio::test]
async fn non_critical_failure_does_not_terminate_the_run() {
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    let registry = ToolRegistry::new()
        .with_tool(
            "navigate",
            FnTool::from_sync(|target| ToolOutcome::ok(json!({ "url": target }))),
        )
        .with_tool(
            "get_page_context",
            FnTool::from_sync(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                ToolOutcome::fail("page context unavailable")
            }),
        )
        .with_tool(
            "answer",
            FnTool::from_sync(|target| ToolOutcome::ok(json!({ "answer": target }))),
        );

    let runner = WorkflowRunner::offline(Arc::new(registry), WorkflowConfig::minimal());
    let (result, state) = runner
        .run_with_state("What is on https://example.com?")
        .await;

    // get_page_context failed (twice, with retry) but the answer step ran.
    assert!(failures.load(Ordering::SeqCst) >= 2);
    assert!(result.success);
    let statuses: Vec<StepStatus> = state
        .executed_steps
        .iter()
        .map(|record| record.status)
        .collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Succeeded]
    );
}
