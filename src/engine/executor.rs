// ABOUTME: Instance execution engine advancing workflows through their task graph
// ABOUTME: Claims work via status CAS and advances instances via version CAS

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::error::{EngineError, Result};
use super::status::{EngineStats, InstanceStatusReport, TaskStatusEntry};
use super::variables::RuntimeVariableSource;
use crate::clock::Clock;
use crate::condition::ConditionEvaluator;
use crate::dispatch::ActionDispatcher;
use crate::hitl::HitlGateManager;
use crate::model::{resolve_execution_order, TaskGroup, VariableBag, WorkflowTask, WorkflowTemplate};
use crate::scheduler::DelayScheduler;
use crate::store::{
    ExecutionRecord, ExecutionStatus, InstanceRecord, InstanceStatus, StateStore, StoreError,
    WakeRecord,
};

/// Drives workflow instances through their task graph. Safe to run from
/// multiple workers against a shared store: execution claims use status
/// CAS and instance advancement uses version CAS, so concurrent workers
/// either win a step or silently yield it.
pub struct ExecutionEngine {
    store: Arc<dyn StateStore>,
    dispatcher: Arc<ActionDispatcher>,
    scheduler: DelayScheduler,
    gate: HitlGateManager,
    variables: Arc<dyn RuntimeVariableSource>,
    evaluator: ConditionEvaluator,
    clock: Arc<dyn Clock>,
}

/// What the advancement loop decided to do with the current work item.
enum Step {
    Continue,
    Yield,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        dispatcher: Arc<ActionDispatcher>,
        scheduler: DelayScheduler,
        gate: HitlGateManager,
        variables: Arc<dyn RuntimeVariableSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            scheduler,
            gate,
            variables,
            evaluator: ConditionEvaluator::new(),
            clock,
        }
    }

    /// Validate a template's task graph and make it available for new
    /// instances. Validation collects every violation before rejecting.
    #[instrument(skip(self, template), fields(template_id = %template.id))]
    pub async fn publish_template(&self, template: WorkflowTemplate) -> Result<()> {
        resolve_execution_order(&template)?;
        self.store.insert_template(template).await?;
        info!("published workflow template");
        Ok(())
    }

    /// Start a new instance from a published template. The template is
    /// snapshotted by value, so later edits never affect this instance.
    #[instrument(skip(self, initial_variables))]
    pub async fn start_instance(
        &self,
        template_id: &str,
        initial_variables: VariableBag,
    ) -> Result<String> {
        self.start_instance_with_context(template_id, initial_variables, None)
            .await
    }

    /// Start an instance carrying a free-form reference back to the CRM
    /// record it belongs to (a lead or deal id).
    #[instrument(skip(self, initial_variables, context_ref))]
    pub async fn start_instance_with_context(
        &self,
        template_id: &str,
        initial_variables: VariableBag,
        context_ref: Option<String>,
    ) -> Result<String> {
        let template = self
            .store
            .get_template(template_id)
            .await
            .map_err(|_| EngineError::TemplateNotFound(template_id.to_string()))?;

        let mut instance = InstanceRecord::new(template, initial_variables, self.clock.now());
        instance.context_ref = context_ref;
        let instance_id = instance.id.clone();
        self.store.insert_instance(instance).await?;
        info!(%instance_id, template_id, "started workflow instance");

        self.run_instance(&instance_id).await?;
        Ok(instance_id)
    }

    /// Advance an instance as far as it can go right now. Returns once
    /// the instance completes, parks on a delay or approval, pauses, or
    /// loses a step to another worker.
    #[instrument(skip(self))]
    pub async fn run_instance(&self, instance_id: &str) -> Result<()> {
        loop {
            let instance = self.get_instance(instance_id).await?;
            if instance.status != InstanceStatus::Running {
                debug!(status = %instance.status, "instance not running, yielding");
                return Ok(());
            }

            let groups = resolve_execution_order(&instance.template)?;

            let task = match self.current_task(&instance, &groups) {
                Some(task) => task.clone(),
                None => {
                    self.complete_instance(instance).await?;
                    return Ok(());
                }
            };

            let latest = self.store.latest_execution(instance_id, &task.id).await?;
            let step = match latest {
                None => {
                    let execution =
                        ExecutionRecord::new(instance_id, &task.id, 1, self.clock.now());
                    self.store.insert_execution(execution).await?;
                    Step::Continue
                }
                Some(execution) if execution.status.is_terminal() => {
                    self.advance_past(&instance, &groups, &task, &execution).await?
                }
                Some(execution) => self.drive_execution(&instance, &task, execution).await?,
            };

            match step {
                Step::Continue => continue,
                Step::Yield => return Ok(()),
            }
        }
    }

    /// The task the instance should look at next: spliced branches run
    /// before the main sequence resumes.
    fn current_task<'a>(
        &self,
        instance: &'a InstanceRecord,
        groups: &'a [TaskGroup],
    ) -> Option<&'a WorkflowTask> {
        if let Some(branch_id) = instance.pending_branches.first() {
            return instance.template.get_task(branch_id);
        }
        groups.get(instance.cursor).map(|g| &g.main)
    }

    /// Handle a non-terminal execution: schedule its delay, claim it, or
    /// yield if someone else holds it.
    async fn drive_execution(
        &self,
        instance: &InstanceRecord,
        task: &WorkflowTask,
        execution: ExecutionRecord,
    ) -> Result<Step> {
        match execution.status {
            ExecutionStatus::Pending => {
                // First attempts honor the task delay; retries run immediately.
                let delay = task.delay();
                if execution.attempt == 1
                    && delay > chrono::Duration::zero()
                    && !self.scheduler.has_wake(&execution.id).await?
                {
                    let scheduled = self
                        .scheduler
                        .schedule_wake(&execution.id, &instance.id, delay)
                        .await?;
                    if scheduled.is_some() {
                        return Ok(Step::Yield);
                    }
                    // Lost the scheduling race, re-read on the next pass
                    return Ok(Step::Continue);
                }

                let claimed = self
                    .store
                    .compare_and_set_execution(
                        &execution.id,
                        ExecutionStatus::Pending,
                        ExecutionStatus::Running,
                    )
                    .await?;
                if !claimed {
                    debug!(execution_id = %execution.id, "execution claimed elsewhere, yielding");
                    return Ok(Step::Yield);
                }
                self.execute_claimed(instance, task, execution).await
            }
            ExecutionStatus::Scheduled | ExecutionStatus::WaitingHitl | ExecutionStatus::Running => {
                Ok(Step::Yield)
            }
            // Terminal statuses are handled by advance_past
            _ => Ok(Step::Continue),
        }
    }

    /// Run an execution this worker has claimed. The execution's status
    /// is already RUNNING in the store.
    async fn execute_claimed(
        &self,
        instance: &InstanceRecord,
        task: &WorkflowTask,
        mut execution: ExecutionRecord,
    ) -> Result<Step> {
        execution.mark_started(self.clock.now());
        self.store.update_execution(execution.clone()).await?;

        let runtime = self.variables.load(&instance.id).await.unwrap_or_else(|e| {
            warn!(instance_id = %instance.id, error = %e, "runtime variable load failed, using stored bag");
            VariableBag::new()
        });
        let variables = instance.variables.merged_with(&runtime);

        if task.is_hitl {
            if let Some(hitl) = &task.hitl {
                self.gate
                    .open_gate(&instance.id, &execution.id, hitl, &variables)
                    .await?;
                self.set_instance_status(&instance.id, InstanceStatus::WaitingHitl, "park")
                    .await?;
                return Ok(Step::Yield);
            }
            warn!(task_id = %task.id, "task marked HITL but has no approval settings, executing directly");
        }

        let report = self
            .dispatcher
            .dispatch(&execution.id, &task.actions, &variables)
            .await;

        execution.action_results = report.results;
        execution.warnings = report.warnings;
        let now = self.clock.now();
        if report.success {
            execution.mark_completed(now);
            info!(task_id = %task.id, execution_id = %execution.id, "task completed");
        } else {
            let reason = report
                .failure_reason
                .unwrap_or_else(|| "action dispatch failed".to_string());
            execution.mark_failed(reason.clone(), now);
            warn!(task_id = %task.id, execution_id = %execution.id, %reason, "task failed");
        }
        self.store.update_execution(execution).await?;
        Ok(Step::Continue)
    }

    /// Move the instance past a task whose latest execution is terminal.
    /// Completed mains splice their branches in; failed mains record
    /// their branches as skipped. A failure stays on the execution record
    /// and the instance keeps advancing. A lost version CAS means another
    /// worker advanced first.
    async fn advance_past(
        &self,
        instance: &InstanceRecord,
        groups: &[TaskGroup],
        task: &WorkflowTask,
        execution: &ExecutionRecord,
    ) -> Result<Step> {
        if execution.status == ExecutionStatus::Failed {
            warn!(
                instance_id = %instance.id,
                task_id = %task.id,
                reason = execution.failure_reason.as_deref().unwrap_or("unknown"),
                "task failed, advancing past it"
            );
        }

        let mut updated = instance.clone();

        if task.is_branch() {
            updated.pending_branches.retain(|id| id != &task.id);
        } else {
            if execution.status == ExecutionStatus::Completed {
                let fired = self
                    .splice_branches(instance, groups, task, execution)
                    .await?;
                updated.pending_branches.extend(fired);
            } else {
                self.skip_branches(instance, task, execution).await?;
            }
            updated.cursor += 1;
        }

        match self.store.update_instance(updated).await {
            Ok(_) => Ok(Step::Continue),
            Err(StoreError::VersionConflict { .. }) => {
                debug!(instance_id = %instance.id, "lost advancement race, yielding");
                Ok(Step::Yield)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Evaluate the branches of a completed main task. Branches that fire
    /// get a fresh pending execution and join the run queue; branches that
    /// do not fire are recorded as skipped. Branches already resolved for
    /// this attempt are left alone, which keeps re-runs idempotent.
    async fn splice_branches(
        &self,
        instance: &InstanceRecord,
        groups: &[TaskGroup],
        task: &WorkflowTask,
        parent_execution: &ExecutionRecord,
    ) -> Result<Vec<String>> {
        let group = match groups.iter().find(|g| g.main.id == task.id) {
            Some(group) => group,
            None => return Ok(Vec::new()),
        };

        let runtime = self.variables.load(&instance.id).await.unwrap_or_default();
        let variables = instance.variables.merged_with(&runtime);

        let mut fired = Vec::new();
        for branch in &group.branches {
            let latest = self.store.latest_execution(&instance.id, &branch.id).await?;
            let (eligible, next_attempt) = match &latest {
                None => (true, 1),
                Some(e)
                    if e.status == ExecutionStatus::Skipped
                        && e.attempt < parent_execution.attempt =>
                {
                    (true, e.attempt + 1)
                }
                Some(_) => (false, 0),
            };
            if !eligible {
                continue;
            }

            let condition = match &branch.branch_condition {
                Some(condition) => condition,
                None => continue,
            };

            let now = self.clock.now();
            let mut execution =
                ExecutionRecord::new(&instance.id, &branch.id, next_attempt, now);
            if self.evaluator.evaluate(condition, &variables) {
                debug!(branch_id = %branch.id, "branch condition fired");
                fired.push(branch.id.clone());
            } else {
                debug!(branch_id = %branch.id, "branch condition did not fire, skipping");
                execution.mark_skipped(now);
            }
            self.store.insert_execution(execution).await?;
        }

        Ok(fired)
    }

    /// Branches of a failed main task cannot be evaluated; they are
    /// recorded as skipped at the parent's attempt so a later retry
    /// re-evaluates them.
    async fn skip_branches(
        &self,
        instance: &InstanceRecord,
        task: &WorkflowTask,
        execution: &ExecutionRecord,
    ) -> Result<()> {
        let now = self.clock.now();
        for branch in instance.template.branches_of(&task.id) {
            let latest = self.store.latest_execution(&instance.id, &branch.id).await?;
            if latest.is_none() {
                let mut skipped =
                    ExecutionRecord::new(&instance.id, &branch.id, execution.attempt, now);
                skipped.mark_skipped(now);
                self.store.insert_execution(skipped).await?;
            }
        }
        Ok(())
    }

    async fn complete_instance(&self, instance: InstanceRecord) -> Result<()> {
        let mut updated = instance;
        updated.mark_terminal(InstanceStatus::Completed, self.clock.now());
        let id = updated.id.clone();
        match self.store.update_instance(updated).await {
            Ok(_) => {
                info!(instance_id = %id, "instance completed");
                Ok(())
            }
            Err(StoreError::VersionConflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim every due wake and resume the instances behind them. Errors
    /// on one instance are logged and never abort the sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let claimed = self.scheduler.claim_due(now).await?;
        let count = claimed.len();

        for wake in claimed {
            if let Err(e) = self.resume_woken(&wake).await {
                error!(
                    instance_id = %wake.instance_id,
                    execution_id = %wake.task_execution_id,
                    error = %e,
                    "failed to resume woken execution"
                );
            }
        }
        Ok(count)
    }

    async fn resume_woken(&self, wake: &WakeRecord) -> Result<()> {
        let instance = self.get_instance(&wake.instance_id).await?;
        let execution = self.store.get_execution(&wake.task_execution_id).await?;

        if instance.status != InstanceStatus::Running {
            // Claimed but the instance is parked; hand the execution back.
            debug!(
                instance_id = %instance.id,
                status = %instance.status,
                "instance not running at wake time, returning execution to pending"
            );
            self.store
                .compare_and_set_execution(
                    &execution.id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Pending,
                )
                .await?;
            return Ok(());
        }

        let task = instance
            .template
            .get_task(&execution.task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound {
                instance: instance.id.clone(),
                task: execution.task_id.clone(),
            })?;

        self.execute_claimed(&instance, &task, execution).await?;
        self.run_instance(&instance.id).await
    }

    /// Escalate overdue approvals. Part of the periodic sweep cycle.
    pub async fn escalate_overdue(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self.gate.escalate_overdue(now).await?)
    }

    #[instrument(skip(self))]
    pub async fn pause_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self.get_instance(instance_id).await?;
        if instance.status != InstanceStatus::Running {
            return Err(EngineError::InvalidState {
                instance: instance_id.to_string(),
                status: instance.status,
                operation: "pause",
            });
        }
        self.set_instance_status(instance_id, InstanceStatus::Paused, "pause")
            .await?;
        info!(instance_id, "instance paused");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self.get_instance(instance_id).await?;
        if instance.status != InstanceStatus::Paused {
            return Err(EngineError::InvalidState {
                instance: instance_id.to_string(),
                status: instance.status,
                operation: "resume",
            });
        }
        self.set_instance_status(instance_id, InstanceStatus::Running, "resume")
            .await?;
        info!(instance_id, "instance resumed");
        self.run_instance(instance_id).await
    }

    /// Cancel a non-terminal instance and drop its scheduled wakes.
    #[instrument(skip(self))]
    pub async fn cancel_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self.get_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Err(EngineError::InvalidState {
                instance: instance_id.to_string(),
                status: instance.status,
                operation: "cancel",
            });
        }

        self.update_with_retry(instance, "cancel", |i| {
            if i.status.is_terminal() {
                return false;
            }
            i.mark_terminal(InstanceStatus::Cancelled, self.clock.now());
            true
        })
        .await?;
        self.store.remove_wakes_for_instance(instance_id).await?;
        info!(instance_id, "instance cancelled");
        Ok(())
    }

    /// Retry a failed task execution with a fresh attempt. Retries skip
    /// the task delay and run immediately. Retrying a task the instance
    /// already moved past rewinds the cursor to it; a completed instance
    /// reopens, re-walks the tail of the sequence, and completes again.
    /// Cancelled instances stay cancelled.
    #[instrument(skip(self))]
    pub async fn retry_task(&self, task_execution_id: &str) -> Result<()> {
        let failed = self
            .store
            .get_execution(task_execution_id)
            .await
            .map_err(|_| EngineError::ExecutionNotFound(task_execution_id.to_string()))?;

        let instance = self.get_instance(&failed.instance_id).await?;
        if instance.status == InstanceStatus::Cancelled {
            return Err(EngineError::InvalidState {
                instance: instance.id.clone(),
                status: instance.status,
                operation: "retry",
            });
        }

        // Only the latest attempt is retryable, and only if it failed.
        let latest = self
            .store
            .latest_execution(&failed.instance_id, &failed.task_id)
            .await?
            .filter(|e| e.id == failed.id && e.status == ExecutionStatus::Failed)
            .ok_or_else(|| EngineError::NothingToRetry {
                instance: failed.instance_id.clone(),
                task: failed.task_id.clone(),
            })?;

        let execution = ExecutionRecord::new(
            &failed.instance_id,
            &failed.task_id,
            latest.attempt + 1,
            self.clock.now(),
        );
        self.store.insert_execution(execution).await?;

        let task_is_branch = instance
            .template
            .get_task(&failed.task_id)
            .map(|t| t.is_branch())
            .unwrap_or(false);
        let group_index = resolve_execution_order(&instance.template)?
            .iter()
            .position(|g| g.main.id == failed.task_id);

        let instance_id = failed.instance_id.clone();
        let task_id = failed.task_id.clone();
        self.update_with_retry(instance, "retry", move |i| {
            if i.status == InstanceStatus::Cancelled {
                return false;
            }
            i.status = InstanceStatus::Running;
            i.completed_at = None;
            if task_is_branch {
                if !i.pending_branches.iter().any(|id| id == &task_id) {
                    i.pending_branches.insert(0, task_id.clone());
                }
            } else if let Some(index) = group_index {
                i.cursor = i.cursor.min(index);
            }
            true
        })
        .await?;

        info!(
            %instance_id,
            task_id = %failed.task_id,
            attempt = latest.attempt + 1,
            "retrying task"
        );
        self.run_instance(&instance_id).await
    }

    /// Approve an open gate and push the instance forward.
    pub async fn approve_hitl(&self, approval_id: &str, notes: Option<String>) -> Result<()> {
        let resolution = self.gate.approve(approval_id, notes).await?;
        self.run_instance(&resolution.instance_id).await
    }

    /// Reject an open gate. The instance pauses and stays paused until
    /// someone intervenes.
    pub async fn reject_hitl(&self, approval_id: &str, reason: &str) -> Result<()> {
        self.gate.reject(approval_id, reason).await?;
        Ok(())
    }

    /// Point-in-time report for one instance.
    pub async fn instance_status(&self, instance_id: &str) -> Result<InstanceStatusReport> {
        let instance = self.get_instance(instance_id).await?;
        let groups = resolve_execution_order(&instance.template)?;

        let mut tasks = Vec::new();
        let mut terminal_mains = 0usize;
        for group in &groups {
            let entry = self.task_entry(&instance, &group.main).await?;
            if entry.status.map(|s| s.is_terminal()).unwrap_or(false) {
                terminal_mains += 1;
            }
            tasks.push(entry);
            for branch in &group.branches {
                tasks.push(self.task_entry(&instance, branch).await?);
            }
        }

        let progress_percent = if groups.is_empty() {
            100
        } else {
            ((terminal_mains * 100) / groups.len()) as u8
        };

        let open_approvals = self
            .store
            .open_approvals(instance_id)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();

        Ok(InstanceStatusReport {
            instance_id: instance.id,
            template_id: instance.template.id,
            status: instance.status,
            progress_percent,
            tasks,
            open_approvals,
        })
    }

    /// Aggregate instance counts across the store.
    pub async fn engine_stats(&self) -> Result<EngineStats> {
        let mut stats = EngineStats::default();
        for instance in self.store.list_instances().await? {
            stats.record(instance.status);
        }
        Ok(stats)
    }

    async fn task_entry(
        &self,
        instance: &InstanceRecord,
        task: &WorkflowTask,
    ) -> Result<TaskStatusEntry> {
        let latest = self.store.latest_execution(&instance.id, &task.id).await?;
        Ok(TaskStatusEntry {
            task_id: task.id.clone(),
            name: task.display_name().to_string(),
            is_branch: task.is_branch(),
            status: latest.as_ref().map(|e| e.status),
            attempt: latest.as_ref().map(|e| e.attempt),
            failure_reason: latest.and_then(|e| e.failure_reason),
        })
    }

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        self.store
            .get_instance(instance_id)
            .await
            .map_err(|_| EngineError::InstanceNotFound(instance_id.to_string()))
    }

    async fn set_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        operation: &'static str,
    ) -> Result<()> {
        let instance = self.get_instance(instance_id).await?;
        self.update_with_retry(instance, operation, move |i| {
            if i.status.is_terminal() {
                return false;
            }
            i.status = status;
            true
        })
        .await
    }

    /// Apply a mutation under version CAS, re-reading and re-applying on
    /// conflict. The closure runs against the freshest record and returns
    /// false to abort, which surfaces as an invalid-state error; callers
    /// re-check their preconditions inside it so a concurrent cancel is
    /// never overwritten.
    async fn update_with_retry(
        &self,
        mut instance: InstanceRecord,
        operation: &'static str,
        apply: impl Fn(&mut InstanceRecord) -> bool,
    ) -> Result<()> {
        loop {
            if !apply(&mut instance) {
                return Err(EngineError::InvalidState {
                    instance: instance.id.clone(),
                    status: instance.status,
                    operation,
                });
            }
            match self.store.update_instance(instance.clone()).await {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => {
                    instance = self.get_instance(&instance.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
