//! Per-run publish/subscribe broker for tool-execution lifecycle events.
//!
//! Each orchestrated run owns its own [`ProgressBroker`] instance, so
//! concurrent runs never share subscriber lists or histories. Delivery is
//! synchronous and preserves registration order; the full emission log is
//! retained for post-run summaries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use webpilot_core_types::ToolCallId;

/// Lifecycle phase of one tool invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Starting,
    Executing,
    Completed,
    Error,
}

impl ToolPhase {
    /// Terminal phases end the lifecycle of a tool call id.
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolPhase::Completed | ToolPhase::Error)
    }
}

/// Immutable record of one tool-execution lifecycle transition.
///
/// For a given `tool_call_id` the emitted phases form a prefix of
/// `starting -> executing -> (completed | error)`; no phase follows a
/// terminal one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolExecutionEvent {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub phase: ToolPhase,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionEvent {
    pub fn new(tool_call_id: ToolCallId, tool_name: impl Into<String>, phase: ToolPhase) -> Self {
        Self {
            tool_call_id,
            tool_name: tool_name.into(),
            phase,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Error returned by a subscriber handler. Logged by the broker, never
/// propagated to the publishing stage or to other subscribers.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Handle returned by [`ProgressBroker::subscribe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

type EventHandler = dyn Fn(&ToolExecutionEvent) -> Result<(), HandlerError> + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<EventHandler>,
}

/// In-process broker delivering [`ToolExecutionEvent`]s to subscribers in
/// registration order and retaining the emission history for the run.
pub struct ProgressBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    history: Mutex<Vec<ToolExecutionEvent>>,
    next_id: AtomicU64,
}

impl ProgressBroker {
    /// Create a broker scoped to one run.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Register a handler invoked synchronously for every future event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ToolExecutionEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription. Idempotent; safe to call from inside a
    /// handler, including the handler being removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|sub| sub.id != id);
    }

    /// Append the event to the history, then deliver it to every current
    /// subscriber in registration order. Handler failures are logged and
    /// never abort delivery to the remaining subscribers.
    pub fn publish(&self, event: ToolExecutionEvent) {
        self.history.lock().push(event.clone());

        // Snapshot the table so handlers can (un)subscribe without holding
        // the lock across their own invocation.
        let snapshot: Vec<(SubscriptionId, Arc<EventHandler>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|sub| (sub.id, Arc::clone(&sub.handler)))
            .collect();

        for (id, handler) in snapshot {
            let still_subscribed = self.subscribers.lock().iter().any(|sub| sub.id == id);
            if !still_subscribed {
                continue;
            }
            if let Err(err) = handler(&event) {
                warn!(subscriber = id.0, %err, "event subscriber failed; continuing delivery");
            }
        }
    }

    /// Full emission log for the run, in publish order.
    pub fn history(&self) -> Vec<ToolExecutionEvent> {
        self.history.lock().clone()
    }

    /// Number of events emitted so far.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Count of invocations per tool name, derived from `starting` events.
    pub fn tool_usage_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for event in self.history.lock().iter() {
            if event.phase == ToolPhase::Starting {
                *counts.entry(event.tool_name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Materialise an mpsc receiver fed by a subscription, so async
    /// consumers can await events without handling callbacks directly.
    ///
    /// The subscription removes itself once the receiver is dropped.
    pub fn subscribe_channel(
        self: &Arc<Self>,
        capacity: usize,
    ) -> mpsc::Receiver<ToolExecutionEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let broker: Weak<Self> = Arc::downgrade(self);
        let own_id: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());
        let handler_id = Arc::clone(&own_id);

        let id = self.subscribe(move |event| match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(HandlerError(
                "progress channel full; dropping event".to_string(),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if let (Some(broker), Some(id)) = (broker.upgrade(), handler_id.get()) {
                    broker.unsubscribe(*id);
                }
                Err(HandlerError("progress channel closed".to_string()))
            }
        });
        let _ = own_id.set(id);
        rx
    }
}
