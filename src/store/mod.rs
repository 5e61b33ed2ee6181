// ABOUTME: State persistence trait and error types for the execution engine
// ABOUTME: Instance updates use version CAS; execution claims use status CAS

pub mod memory;
pub mod records;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::WorkflowTemplate;
pub use memory::MemoryStore;
pub use records::{
    ApprovalRecord, ApprovalStatus, ExecutionRecord, ExecutionStatus, InstanceRecord,
    InstanceStatus, WakeRecord,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("version conflict updating instance '{id}': expected {expected}, found {found}")]
    VersionConflict {
        id: String,
        expected: u64,
        found: u64,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage backend for all engine state. Two concurrency primitives:
/// `update_instance` compares the record's version counter and bumps it,
/// and `compare_and_set_execution` transitions an execution's status only
/// from an expected value. Everything else is plain CRUD.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn insert_template(&self, template: WorkflowTemplate) -> Result<()>;
    async fn get_template(&self, template_id: &str) -> Result<WorkflowTemplate>;

    async fn insert_instance(&self, instance: InstanceRecord) -> Result<()>;
    async fn get_instance(&self, instance_id: &str) -> Result<InstanceRecord>;
    /// Persist `instance` if its version matches the stored one, then bump
    /// the stored version. Returns `VersionConflict` otherwise.
    async fn update_instance(&self, instance: InstanceRecord) -> Result<InstanceRecord>;
    async fn list_instances(&self) -> Result<Vec<InstanceRecord>>;

    async fn insert_execution(&self, execution: ExecutionRecord) -> Result<()>;
    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord>;
    async fn update_execution(&self, execution: ExecutionRecord) -> Result<()>;
    /// Most recent execution (highest attempt) of a task within an instance.
    async fn latest_execution(
        &self,
        instance_id: &str,
        task_id: &str,
    ) -> Result<Option<ExecutionRecord>>;
    async fn list_executions(&self, instance_id: &str) -> Result<Vec<ExecutionRecord>>;
    /// Atomically transition an execution's status. Returns false when the
    /// current status does not match `from`, meaning another worker won.
    async fn compare_and_set_execution(
        &self,
        execution_id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> Result<bool>;

    async fn insert_approval(&self, approval: ApprovalRecord) -> Result<()>;
    async fn get_approval(&self, approval_id: &str) -> Result<ApprovalRecord>;
    async fn update_approval(&self, approval: ApprovalRecord) -> Result<()>;
    async fn open_approvals(&self, instance_id: &str) -> Result<Vec<ApprovalRecord>>;
    /// Pending approvals whose deadline has passed. Escalated approvals are
    /// excluded so each approval escalates at most once.
    async fn overdue_approvals(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRecord>>;

    async fn insert_wake(&self, wake: WakeRecord) -> Result<()>;
    async fn wake_for_execution(&self, execution_id: &str) -> Result<Option<WakeRecord>>;
    async fn due_wakes(&self, now: DateTime<Utc>) -> Result<Vec<WakeRecord>>;
    async fn remove_wake(&self, execution_id: &str) -> Result<()>;
    async fn remove_wakes_for_instance(&self, instance_id: &str) -> Result<()>;
}
