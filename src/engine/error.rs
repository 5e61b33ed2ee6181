// ABOUTME: Error types for instance execution operations
// ABOUTME: Covers lookups, invalid state transitions, and underlying store failures

use thiserror::Error;

use crate::hitl::HitlError;
use crate::model::GraphValidationError;
use crate::store::{InstanceStatus, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workflow template '{0}' not found")]
    TemplateNotFound(String),

    #[error("workflow instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("task '{task}' not found in instance '{instance}'")]
    TaskNotFound { instance: String, task: String },

    #[error("task execution '{0}' not found")]
    ExecutionNotFound(String),

    #[error("task '{task}' has no failed execution to retry in instance '{instance}'")]
    NothingToRetry { instance: String, task: String },

    #[error("instance '{instance}' is {status}, cannot {operation}")]
    InvalidState {
        instance: String,
        status: InstanceStatus,
        operation: &'static str,
    },

    #[error(transparent)]
    Graph(#[from] GraphValidationError),

    #[error(transparent)]
    Hitl(#[from] HitlError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
