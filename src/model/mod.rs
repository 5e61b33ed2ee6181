// ABOUTME: Task graph model module for workflow templates and tasks
// ABOUTME: Defines template structures, execution ordering, and publish-time validation

pub mod error;
pub mod graph;
pub mod template;
pub mod variables;

pub use error::{GraphValidationError, GraphViolation};
pub use graph::{resolve_execution_order, TaskGroup};
pub use template::{
    ActionConfig, ActionKind, ActionSet, BranchCondition, ConditionField, ConditionOperator,
    DelayUnit, EscalationChannel, EscalationConfig, HitlConfig, RecipientRule, WorkflowTask,
    WorkflowTemplate,
};
pub use variables::VariableBag;
