// ABOUTME: Main library module for the flowline workflow automation engine
// ABOUTME: Exports all core modules and provides the public API

pub mod clock;
pub mod condition;
pub mod dispatch;
pub mod engine;
pub mod hitl;
pub mod model;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::ConditionEvaluator;
pub use dispatch::{
    ActionDispatcher, ActionInvocation, ActionProvider, ActionResult, DispatchReport,
    FailurePolicy,
};
pub use engine::{
    EngineError, EngineStats, ExecutionEngine, InstanceStatusReport, RuntimeVariableSource,
    StaticVariableSource,
};
pub use hitl::{HitlError, HitlGateManager, LogNotificationSink, NotificationSink};
pub use model::{
    ActionConfig, ActionKind, BranchCondition, GraphValidationError, VariableBag, WorkflowTask,
    WorkflowTemplate,
};
pub use scheduler::DelayScheduler;
pub use store::{ApprovalStatus, ExecutionStatus, InstanceStatus, MemoryStore, StateStore};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
