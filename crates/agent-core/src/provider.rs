//! Abstraction over structured-output reasoning backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Transport-level failures from a reasoning provider. Each stage normalizes
/// these into its own [`crate::AgentError`] kind.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider call timed out after {0}ms")]
    Timeout(u64),

    /// The transport succeeded but the response body was not usable.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// A reasoning backend capable of structured-output inference.
///
/// `output_schema` is the JSON schema the response value must satisfy; the
/// caller still re-validates the returned value before trusting it.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &Value,
    ) -> Result<Value, ProviderError>;
}

/// Deterministic provider used for tests and offline development.
///
/// Replays a scripted queue of responses in push order; an exhausted queue
/// reports a transport failure so retry paths stay exercisable.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<Value, ProviderError>>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful structured response.
    pub fn push_value(&self, value: Value) {
        self.responses
            .lock()
            .expect("mock response queue poisoned")
            .push_back(Ok(value));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: ProviderError) {
        self.responses
            .lock()
            .expect("mock response queue poisoned")
            .push_back(Err(error));
    }

    /// Number of invocations seen so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningProvider for MockProvider {
    async fn invoke(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _output_schema: &Value,
    ) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("mock response queue poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::Transport(
                    "mock provider response queue exhausted".to_string(),
                ))
            })
    }
}
