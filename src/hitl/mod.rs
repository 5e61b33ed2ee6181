// ABOUTME: Human-in-the-loop gate management for approval-gated tasks
// ABOUTME: Opens gates, resolves approvals, and escalates overdue requests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::model::{EscalationChannel, HitlConfig, VariableBag};
use crate::store::{
    ApprovalRecord, ApprovalStatus, ExecutionStatus, InstanceStatus, StateStore, StoreError,
};

#[derive(Error, Debug)]
pub enum HitlError {
    #[error("approval '{0}' is already resolved")]
    AlreadyResolved(String),

    #[error("approval '{0}' belongs to a finished instance and cannot be resolved")]
    InstanceFinished(String),

    #[error("a rejection reason is required")]
    ReasonRequired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, HitlError>;

/// Delivery channel for approval and escalation notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, recipient: &str, channel: EscalationChannel, message: &str);
}

/// Sink that only logs. Used when no delivery channel is wired up.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, recipient: &str, channel: EscalationChannel, message: &str) {
        info!(recipient, ?channel, message, "notification");
    }
}

/// Manages the approval lifecycle for gated task executions. Opening a
/// gate parks the execution and its instance in WAITING_HITL; resolution
/// moves both forward (approve) or parks the instance (reject).
pub struct HitlGateManager {
    store: Arc<dyn StateStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

/// Outcome of a resolved approval, so the caller knows which instance to
/// resume.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub instance_id: String,
    pub task_execution_id: String,
}

impl HitlGateManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, sink, clock }
    }

    /// Create an approval request for a gated execution and park the
    /// execution and instance. The escalation settings are snapshotted
    /// onto the approval record.
    pub async fn open_gate(
        &self,
        instance_id: &str,
        task_execution_id: &str,
        config: &HitlConfig,
        variables: &VariableBag,
    ) -> Result<ApprovalRecord> {
        let now = self.clock.now();
        let message = config.message.as_deref().map(|m| {
            crate::dispatch::personalize::render(m, variables).text
        });

        let approval = ApprovalRecord {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            task_execution_id: task_execution_id.to_string(),
            assignee: config.assignee.clone(),
            message,
            deadline: config.deadline_duration().map(|d| now + d),
            status: ApprovalStatus::Pending,
            notes: None,
            escalation: config.escalation.clone(),
            created_at: now,
        };

        self.store.insert_approval(approval.clone()).await?;
        self.store
            .compare_and_set_execution(
                task_execution_id,
                ExecutionStatus::Running,
                ExecutionStatus::WaitingHitl,
            )
            .await?;

        if let Some(message) = &approval.message {
            let channel = config
                .escalation
                .as_ref()
                .map(|e| e.channel)
                .unwrap_or_default();
            self.sink.notify(&approval.assignee, channel, message).await;
        }

        info!(
            instance_id,
            task_execution_id,
            approval_id = %approval.id,
            assignee = %approval.assignee,
            "opened approval gate"
        );
        Ok(approval)
    }

    /// Approve an open gate. The gated execution completes and the
    /// instance returns to RUNNING so the engine can advance it.
    pub async fn approve(&self, approval_id: &str, notes: Option<String>) -> Result<Resolution> {
        let mut approval = self.open_approval(approval_id).await?;
        let now = self.clock.now();

        approval.status = ApprovalStatus::Approved;
        approval.notes = notes;
        self.store.update_approval(approval.clone()).await?;

        let mut execution = self.store.get_execution(&approval.task_execution_id).await?;
        execution.mark_completed(now);
        self.store.update_execution(execution).await?;

        self.set_instance_status(approval_id, &approval.instance_id, InstanceStatus::Running)
            .await?;

        info!(approval_id, instance_id = %approval.instance_id, "approval granted");
        Ok(Resolution {
            instance_id: approval.instance_id,
            task_execution_id: approval.task_execution_id,
        })
    }

    /// Reject an open gate. The gated execution fails with the given
    /// reason and the instance is paused for manual follow-up; it never
    /// resumes on its own.
    pub async fn reject(&self, approval_id: &str, reason: &str) -> Result<Resolution> {
        if reason.trim().is_empty() {
            return Err(HitlError::ReasonRequired);
        }

        let mut approval = self.open_approval(approval_id).await?;
        let now = self.clock.now();

        approval.status = ApprovalStatus::Rejected;
        approval.notes = Some(reason.to_string());
        self.store.update_approval(approval.clone()).await?;

        let mut execution = self.store.get_execution(&approval.task_execution_id).await?;
        execution.mark_failed(format!("approval rejected: {}", reason), now);
        self.store.update_execution(execution).await?;

        self.set_instance_status(approval_id, &approval.instance_id, InstanceStatus::Paused)
            .await?;

        info!(approval_id, instance_id = %approval.instance_id, reason, "approval rejected");
        Ok(Resolution {
            instance_id: approval.instance_id,
            task_execution_id: approval.task_execution_id,
        })
    }

    /// Escalate every pending approval whose deadline has passed. Each
    /// approval escalates at most once because the status moves to
    /// ESCALATED, which the overdue query excludes. Escalated approvals
    /// stay open for resolution.
    pub async fn escalate_overdue(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut escalated = Vec::new();

        for mut approval in self.store.overdue_approvals(now).await? {
            let instance = self.store.get_instance(&approval.instance_id).await?;
            if instance.status.is_terminal() {
                continue;
            }

            if let Some(escalation) = approval.escalation.clone() {
                let message = format!(
                    "approval '{}' for instance '{}' is overdue (assignee: {})",
                    approval.id, approval.instance_id, approval.assignee
                );
                self.sink
                    .notify(&escalation.agent, escalation.channel, &message)
                    .await;
            } else {
                warn!(approval_id = %approval.id, "overdue approval has no escalation target");
            }

            approval.status = ApprovalStatus::Escalated;
            self.store.update_approval(approval.clone()).await?;
            escalated.push(approval.id);
        }

        Ok(escalated)
    }

    async fn open_approval(&self, approval_id: &str) -> Result<ApprovalRecord> {
        let approval = self.store.get_approval(approval_id).await?;
        if !approval.status.is_open() {
            return Err(HitlError::AlreadyResolved(approval_id.to_string()));
        }
        let instance = self.store.get_instance(&approval.instance_id).await?;
        if instance.status.is_terminal() {
            return Err(HitlError::InstanceFinished(approval_id.to_string()));
        }
        Ok(approval)
    }

    async fn set_instance_status(
        &self,
        approval_id: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<()> {
        // Retry on version conflicts; resolution must land. Re-check
        // terminality on every read so a concurrent cancel is never
        // overwritten with RUNNING or PAUSED.
        loop {
            let mut instance = self.store.get_instance(instance_id).await?;
            if instance.status.is_terminal() {
                return Err(HitlError::InstanceFinished(approval_id.to_string()));
            }
            instance.status = status;
            match self.store.update_instance(instance).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
