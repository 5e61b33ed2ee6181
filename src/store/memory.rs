// ABOUTME: In-memory state store backed by a tokio RwLock
// ABOUTME: Reference implementation of StateStore used by tests and single-process deployments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::records::{
    ApprovalRecord, ApprovalStatus, ExecutionRecord, ExecutionStatus, InstanceRecord, WakeRecord,
};
use super::{Result, StateStore, StoreError};
use crate::model::WorkflowTemplate;

// IndexMaps keep insertion order so listings are deterministic.
#[derive(Default)]
struct Inner {
    templates: IndexMap<String, WorkflowTemplate>,
    instances: IndexMap<String, InstanceRecord>,
    executions: IndexMap<String, ExecutionRecord>,
    approvals: IndexMap<String, ApprovalRecord>,
    wakes: IndexMap<String, WakeRecord>,
}

/// Single-process store. All mutation happens under one write lock, which
/// is what makes the CAS operations atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_template(&self, template: WorkflowTemplate) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.templates.insert(template.id.clone(), template);
        Ok(())
    }

    async fn get_template(&self, template_id: &str) -> Result<WorkflowTemplate> {
        let inner = self.inner.read().await;
        inner
            .templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| not_found("template", template_id))
    }

    async fn insert_instance(&self, instance: InstanceRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        let inner = self.inner.read().await;
        inner
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| not_found("instance", instance_id))
    }

    async fn update_instance(&self, mut instance: InstanceRecord) -> Result<InstanceRecord> {
        let mut inner = self.inner.write().await;
        let current = inner
            .instances
            .get(&instance.id)
            .ok_or_else(|| not_found("instance", &instance.id))?;

        if current.version != instance.version {
            return Err(StoreError::VersionConflict {
                id: instance.id.clone(),
                expected: instance.version,
                found: current.version,
            });
        }

        instance.version += 1;
        inner
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let inner = self.inner.read().await;
        let mut instances: Vec<InstanceRecord> = inner.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.started_at);
        Ok(instances)
    }

    async fn insert_execution(&self, execution: ExecutionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let inner = self.inner.read().await;
        inner
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| not_found("execution", execution_id))
    }

    async fn update_execution(&self, execution: ExecutionRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.executions.contains_key(&execution.id) {
            return Err(not_found("execution", &execution.id));
        }
        inner.executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn latest_execution(
        &self,
        instance_id: &str,
        task_id: &str,
    ) -> Result<Option<ExecutionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .executions
            .values()
            .filter(|e| e.instance_id == instance_id && e.task_id == task_id)
            .max_by_key(|e| e.attempt)
            .cloned())
    }

    async fn list_executions(&self, instance_id: &str) -> Result<Vec<ExecutionRecord>> {
        let inner = self.inner.read().await;
        let mut executions: Vec<ExecutionRecord> = inner
            .executions
            .values()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| (e.created_at, e.attempt));
        Ok(executions)
    }

    async fn compare_and_set_execution(
        &self,
        execution_id: &str,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let execution = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| not_found("execution", execution_id))?;

        if execution.status != from {
            return Ok(false);
        }
        execution.status = to;
        Ok(true)
    }

    async fn insert_approval(&self, approval: ApprovalRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.approvals.insert(approval.id.clone(), approval);
        Ok(())
    }

    async fn get_approval(&self, approval_id: &str) -> Result<ApprovalRecord> {
        let inner = self.inner.read().await;
        inner
            .approvals
            .get(approval_id)
            .cloned()
            .ok_or_else(|| not_found("approval", approval_id))
    }

    async fn update_approval(&self, approval: ApprovalRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.approvals.contains_key(&approval.id) {
            return Err(not_found("approval", &approval.id));
        }
        inner.approvals.insert(approval.id.clone(), approval);
        Ok(())
    }

    async fn open_approvals(&self, instance_id: &str) -> Result<Vec<ApprovalRecord>> {
        let inner = self.inner.read().await;
        let mut approvals: Vec<ApprovalRecord> = inner
            .approvals
            .values()
            .filter(|a| a.instance_id == instance_id && a.status.is_open())
            .cloned()
            .collect();
        approvals.sort_by_key(|a| a.created_at);
        Ok(approvals)
    }

    async fn overdue_approvals(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .approvals
            .values()
            .filter(|a| {
                a.status == ApprovalStatus::Pending
                    && a.deadline.map(|d| d < now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn insert_wake(&self, wake: WakeRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.wakes.insert(wake.task_execution_id.clone(), wake);
        Ok(())
    }

    async fn wake_for_execution(&self, execution_id: &str) -> Result<Option<WakeRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.wakes.get(execution_id).cloned())
    }

    async fn due_wakes(&self, now: DateTime<Utc>) -> Result<Vec<WakeRecord>> {
        let inner = self.inner.read().await;
        let mut wakes: Vec<WakeRecord> = inner
            .wakes
            .values()
            .filter(|w| w.wake_at <= now)
            .cloned()
            .collect();
        wakes.sort_by_key(|w| w.wake_at);
        Ok(wakes)
    }

    async fn remove_wake(&self, execution_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.wakes.shift_remove(execution_id);
        Ok(())
    }

    async fn remove_wakes_for_instance(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.wakes.retain(|_, w| w.instance_id != instance_id);
        Ok(())
    }
}
