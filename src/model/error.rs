// ABOUTME: Error types for workflow template validation
// ABOUTME: Collects every graph violation so the editor can surface all problems at once

use thiserror::Error;

/// Publish-time validation failure. Carries every violation found in the
/// template, not just the first.
#[derive(Error, Debug, Clone)]
#[error("workflow template validation failed: {}", format_violations(.violations))]
pub struct GraphValidationError {
    pub violations: Vec<GraphViolation>,
}

fn format_violations(violations: &[GraphViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphViolation {
    #[error("task '{task}' references unknown parent task '{parent}'")]
    UnknownParent { task: String, parent: String },

    #[error("branch task '{task}' has no branch condition")]
    MissingBranchCondition { task: String },

    #[error("task '{task}' has a branch condition but no parent task")]
    ConditionWithoutParent { task: String },

    #[error("branch task '{task}' is parented to branch task '{parent}'; branches must attach to main-sequence tasks")]
    BranchOfBranch { task: String, parent: String },

    #[error("cycle detected in parent task chain: {chain:?}")]
    ParentCycle { chain: Vec<String> },

    #[error("duplicate task id '{task}'")]
    DuplicateTaskId { task: String },

    #[error("display order {order} is used by more than one main-sequence task: {tasks:?}")]
    DuplicateDisplayOrder { order: u32, tasks: Vec<String> },

    #[error("main-sequence display orders are not dense: expected {expected}, found {found}")]
    NonDenseDisplayOrder { expected: u32, found: u32 },

    #[error("main-sequence task '{task}' has no display order")]
    MissingDisplayOrder { task: String },

    #[error("branch condition on task '{task}' uses the custom field type but names no key")]
    MissingCustomKey { task: String },

    #[error("template has no tasks")]
    EmptyTemplate,

    #[error("template could not be read: {reason}")]
    Unreadable { reason: String },
}

impl From<GraphViolation> for GraphValidationError {
    fn from(violation: GraphViolation) -> Self {
        GraphValidationError {
            violations: vec![violation],
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphValidationError>;
