// ABOUTME: Workflow instance execution module
// ABOUTME: Exposes the engine, its error types, status reports, and variable sources

pub mod error;
pub mod executor;
pub mod status;
pub mod variables;

pub use error::{EngineError, Result};
pub use executor::ExecutionEngine;
pub use status::{EngineStats, InstanceStatusReport, TaskStatusEntry};
pub use variables::{RuntimeVariableSource, StaticVariableSource};
