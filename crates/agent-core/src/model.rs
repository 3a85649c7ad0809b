use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use webpilot_core_types::RunId;

/// Snapshot of run context handed to the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Last navigated URL, if known.
    pub current_url: Option<String>,
    /// Action names the execution stage can dispatch. The planner is told to
    /// stay within this set; empty means unrestricted.
    #[serde(default)]
    pub available_tools: Vec<String>,
    /// Free-form hints carried over from earlier cycles.
    #[serde(default)]
    pub memory_hints: Vec<String>,
    /// Arbitrary metadata for downstream tooling.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn with_current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn with_available_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    /// Whether the named action may be planned against this context.
    pub fn allows_tool(&self, name: &str) -> bool {
        self.available_tools.is_empty()
            || self
                .available_tools
                .iter()
                .any(|tool| tool.eq_ignore_ascii_case(name))
    }
}

/// Request envelope for one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub run_id: RunId,
    /// Natural-language task provided by the caller.
    pub query: String,
    #[serde(default)]
    pub context: RunContext,
    /// Explicit constraints the planner should obey.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl TaskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            query: query.into(),
            context: RunContext::default(),
            constraints: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Reasoning-provider identity and credentials. Opaque to the stages that
/// carry it; only the provider adapter reads the fields.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    /// Model identifier, e.g. `gpt-4o-mini`.
    pub model: String,
    pub api_key: Option<String>,
    /// Override for OpenAI-compatible deployments; adapter default otherwise.
    pub base_url: Option<String>,
    /// Per-request transport budget in milliseconds.
    pub request_timeout_ms: u64,
}

impl ProviderSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            base_url: None,
            request_timeout_ms: 60_000,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn has_credentials(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Capability flags resolved once at run configuration time.
///
/// Stages branch on these flags instead of re-checking credential presence
/// at each call site; a run without credentials uses the deterministic
/// planner and skips provider-backed evaluation and diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub llm_planning: bool,
    pub llm_evaluation: bool,
    pub llm_diagnosis: bool,
}

impl Capabilities {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let llm = settings.has_credentials() && !settings.model.trim().is_empty();
        Self {
            llm_planning: llm,
            llm_evaluation: llm,
            llm_diagnosis: llm,
        }
    }

    pub fn full() -> Self {
        Self {
            llm_planning: true,
            llm_evaluation: true,
            llm_diagnosis: true,
        }
    }

    pub fn offline() -> Self {
        Self {
            llm_planning: false,
            llm_evaluation: false,
            llm_diagnosis: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_require_credentials_and_model() {
        let bare = ProviderSettings::new("gpt-4o-mini");
        assert_eq!(Capabilities::from_settings(&bare), Capabilities::offline());

        let keyed = ProviderSettings::new("gpt-4o-mini").with_api_key("sk-test");
        assert_eq!(Capabilities::from_settings(&keyed), Capabilities::full());

        let blank_key = ProviderSettings::new("gpt-4o-mini").with_api_key("   ");
        assert_eq!(
            Capabilities::from_settings(&blank_key),
            Capabilities::offline()
        );
    }

    #[test]
    fn context_tool_allowance() {
        let open = RunContext::default();
        assert!(open.allows_tool("navigate"));

        let restricted =
            RunContext::default().with_available_tools(vec!["navigate".to_string()]);
        assert!(restricted.allows_tool("navigate"));
        assert!(restricted.allows_tool("NAVIGATE"));
        assert!(!restricted.allows_tool("click"));
    }
}
