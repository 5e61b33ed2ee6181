// ABOUTME: Persistent record types for instances, executions, approvals, and wakes
// ABOUTME: Defines the status enums and lifecycle helpers used across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::ActionResult;
use crate::model::{EscalationConfig, VariableBag, WorkflowTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Running,
    Paused,
    WaitingHitl,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Paused => "PAUSED",
            InstanceStatus::WaitingHitl => "WAITING_HITL",
            InstanceStatus::Completed => "COMPLETED",
            InstanceStatus::Failed => "FAILED",
            InstanceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Scheduled,
    Running,
    WaitingHitl,
    Completed,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Scheduled => "SCHEDULED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::WaitingHitl => "WAITING_HITL",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl ApprovalStatus {
    /// Escalated approvals are still open for resolution.
    pub fn is_open(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Escalated => "ESCALATED",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One running (or finished) copy of a workflow template. Carries its
/// own snapshot of the template, a cursor into the resolved group order,
/// and a version counter for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub template: WorkflowTemplate,
    pub status: InstanceStatus,
    pub variables: VariableBag,
    pub cursor: usize,
    pub pending_branches: Vec<String>,
    pub version: u64,
    pub context_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    pub fn new(
        template: WorkflowTemplate,
        variables: VariableBag,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template,
            status: InstanceStatus::Running,
            variables,
            cursor: 0,
            pending_branches: Vec::new(),
            version: 0,
            context_ref: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn mark_terminal(&mut self, status: InstanceStatus, at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(at);
    }
}

/// One attempt at one task within an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub instance_id: String,
    pub task_id: String,
    pub attempt: u32,
    pub status: ExecutionStatus,
    pub action_results: Vec<ActionResult>,
    pub warnings: Vec<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(instance_id: &str, task_id: &str, attempt: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            task_id: task_id.to_string(),
            attempt,
            status: ExecutionStatus::Pending,
            action_results: Vec::new(),
            warnings: Vec::new(),
            failure_reason: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(at);
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(at);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(at);
    }

    pub fn mark_skipped(&mut self, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Skipped;
        self.completed_at = Some(at);
    }
}

/// A human approval request for a gated task execution. Escalation
/// settings are snapshotted at gate-open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub instance_id: String,
    pub task_execution_id: String,
    pub assignee: String,
    pub message: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: ApprovalStatus,
    pub notes: Option<String>,
    pub escalation: Option<EscalationConfig>,
    pub created_at: DateTime<Utc>,
}

/// A scheduled wake for a delayed task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeRecord {
    pub task_execution_id: String,
    pub instance_id: String,
    pub wake_at: DateTime<Utc>,
}
