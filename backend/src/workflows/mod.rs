// Workflow Execution Engine
//
// Drives form-triggered executions through a graph of start, notification,
// approval, condition and end steps, pausing at approvals until resumed.

pub mod conditions;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod runner;

pub use engine::{EngineConfig, EngineError, ResumeCommand, WorkflowEngine};
