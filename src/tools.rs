//! Tool registry: opaque browser-action callables keyed by action name.
//!
//! The orchestrator treats every tool as an external collaborator with a
//! name, an input, and a result-or-error outcome. Concrete browser drivers
//! live outside this crate; tests and the CLI demo register stand-ins.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use agent_core::StepAction;

/// Result contract for one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// One opaque browser-action callable.
///
/// `timeout` is the budget the execution stage enforces around the call;
/// implementations may use it to bound their own inner waits.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, target: &str, timeout: Duration) -> ToolOutcome;
}

/// Read-only mapping from action name to callable, shared by reference
/// across the stages of one run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    /// Builder-style registration.
    pub fn with_tool(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.register(name, tool);
        self
    }

    pub fn get(&self, action: &StepAction) -> Option<Arc<dyn Tool>> {
        self.tools.get(action.as_str()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered action names, sorted for stable prompts and logs.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;

/// Adapter turning a closure into a [`Tool`]. Used by tests and the CLI demo
/// registry.
pub struct FnTool {
    handler: Box<dyn Fn(String) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(String) -> ToolFuture + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
        })
    }

    /// Convenience wrapper for synchronous handlers.
    pub fn from_sync<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str) -> ToolOutcome + Send + Sync + 'static,
    {
        Self::new(move |target: String| {
            let outcome = handler(&target);
            Box::pin(async move { outcome }) as ToolFuture
        })
    }
}

#[async_trait]
impl Tool for FnTool {
    async fn call(&self, target: &str, _timeout: Duration) -> ToolOutcome {
        (self.handler)(target.to_string()).await
    }
}
