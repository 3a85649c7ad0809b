use thiserror::Error;

/// Errors emitted by the orchestration stages.
///
/// Classification happens at each stage boundary: only fatal kinds propagate
/// to the orchestrator as a terminal transition; everything else is absorbed
/// into step records and the run diary.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// The planner returned structurally invalid output. Fatal to the
    /// planning cycle; surfaced, never silently repaired.
    #[error("planner output failed schema validation: {0}")]
    PlanningSchema(String),

    /// Transport-level planning failure (timeout, rate limit, malformed
    /// response). The orchestrator decides between retry and fallback.
    #[error("planning provider failed: {0}")]
    PlanningProvider(String),

    /// Transport-level evaluation failure. Treated fail-open by the caller.
    #[error("evaluation provider failed: {0}")]
    EvaluationProvider(String),

    /// Transport-level diagnosis failure. Absorbed by the fallback report.
    #[error("analysis provider failed: {0}")]
    AnalysisProvider(String),

    /// A plan step names an action missing from the tool registry.
    #[error("no tool registered for action '{0}'")]
    UnknownTool(String),

    /// A suspended call exceeded its per-call budget.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The run was cancelled from outside. Terminal; skips diagnostics.
    #[error("run cancelled")]
    Cancelled,

    /// Malformed request or configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AgentError {
    /// Helper for per-call timeout errors.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Helper for missing-tool errors.
    pub fn unknown_tool(action: impl Into<String>) -> Self {
        Self::UnknownTool(action.into())
    }

    /// Helper for malformed requests.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether this classification terminates the run outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PlanningSchema(_) | Self::Cancelled)
    }
}
