//! WebPilot orchestration engine.
//!
//! Composes the agent-core planning, evaluation, and failure-analysis stages
//! with the execution stage and a per-run event broker into a single workflow
//! state machine. [`workflow::WorkflowRunner`] is the entry point.

pub mod config;
pub mod executor;
pub mod llm;
pub mod progress;
pub mod summary;
pub mod tools;
pub mod workflow;

pub use config::{ExecutionPolicy, TimeoutOutcome, WorkflowConfig};
pub use executor::{ExecutionReport, StepRecord};
pub use progress::{progress_records, ProgressRecord, ProgressStatus};
pub use tools::{FnTool, Tool, ToolOutcome, ToolRegistry};
pub use workflow::{RunResult, WorkflowPhase, WorkflowRunner, WorkflowState};
