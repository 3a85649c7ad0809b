//! Deterministic fallback summaries built from execution records.
//!
//! Pure functions of the recorded trajectory: no clocks, no providers.
//! Replaying the same records produces byte-identical text, which is what
//! lets the orchestrator conclude a timed-out run without further calls.

use std::fmt::Write as _;

use agent_core::{StepAction, StepStatus};

use crate::executor::StepRecord;

/// URL reached by the last successful navigation, if any.
pub fn last_url(records: &[StepRecord]) -> Option<String> {
    records
        .iter()
        .rev()
        .find(|record| record.action == StepAction::Navigate && record.success)
        .and_then(|record| record.url.clone())
}

/// Render the trajectory as a plain-text summary: step counts, final URL,
/// and a per-step listing.
pub fn fallback_summary(objective: &str, records: &[StepRecord]) -> String {
    let succeeded = records
        .iter()
        .filter(|record| record.status == StepStatus::Succeeded)
        .count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Completed {} of {} recorded step(s) for: {}",
        succeeded,
        records.len(),
        objective
    );
    if let Some(url) = last_url(records) {
        let _ = writeln!(out, "Final URL: {url}");
    }
    if !records.is_empty() {
        let _ = writeln!(out, "Trajectory:");
        for record in records {
            let _ = writeln!(out, "  {}", trajectory_line(record));
        }
    }
    out
}

fn trajectory_line(record: &StepRecord) -> String {
    let detail = match record.status {
        StepStatus::Succeeded => format!("succeeded, {}ms", record.duration_ms),
        StepStatus::Failed => format!(
            "failed: {}",
            record.error.as_deref().unwrap_or("no error detail")
        ),
        StepStatus::Skipped => "skipped".to_string(),
        StepStatus::Pending => "pending".to_string(),
        StepStatus::Running => "running".to_string(),
    };
    format!(
        "{}. {} '{}' [{}]",
        record.index, record.action, record.target, detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::StepAction;

    fn record(index: u32, action: StepAction, target: &str, status: StepStatus) -> StepRecord {
        StepRecord {
            index,
            action: action.clone(),
            target: target.to_string(),
            status,
            success: status == StepStatus::Succeeded,
            url: match (action, status) {
                (StepAction::Navigate, StepStatus::Succeeded) => Some(target.to_string()),
                _ => None,
            },
            duration_ms: 42,
            attempts: 1,
            error: match status {
                StepStatus::Failed => Some("boom".to_string()),
                _ => None,
            },
            repeated_failure: false,
            data: None,
        }
    }

    #[test]
    fn summary_generation_is_idempotent() {
        let records = vec![
            record(
                1,
                StepAction::Navigate,
                "https://example.com",
                StepStatus::Succeeded,
            ),
            record(2, StepAction::Click, "#submit", StepStatus::Failed),
            record(3, StepAction::Answer, "report", StepStatus::Skipped),
        ];

        let first = fallback_summary("demo objective", &records);
        let second = fallback_summary("demo objective", &records);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn summary_lists_counts_url_and_trajectory() {
        let records = vec![
            record(
                1,
                StepAction::Navigate,
                "https://example.com",
                StepStatus::Succeeded,
            ),
            record(2, StepAction::Click, "#submit", StepStatus::Failed),
        ];

        let text = fallback_summary("demo objective", &records);
        assert!(text.starts_with("Completed 1 of 2 recorded step(s) for: demo objective"));
        assert!(text.contains("Final URL: https://example.com"));
        assert!(text.contains("1. navigate 'https://example.com' [succeeded, 42ms]"));
        assert!(text.contains("2. click '#submit' [failed: boom]"));
    }

    #[test]
    fn last_url_ignores_failed_navigations() {
        let records = vec![
            record(
                1,
                StepAction::Navigate,
                "https://example.com",
                StepStatus::Succeeded,
            ),
            record(
                2,
                StepAction::Navigate,
                "https://example.org",
                StepStatus::Failed,
            ),
        ];
        assert_eq!(last_url(&records), Some("https://example.com".to_string()));
    }

    #[test]
    fn empty_trajectory_still_summarizes() {
        let text = fallback_summary("demo objective", &[]);
        assert!(text.starts_with("Completed 0 of 0 recorded step(s)"));
        assert!(!text.contains("Trajectory:"));
    }
}
