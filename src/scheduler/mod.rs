// ABOUTME: Delay scheduling for task executions
// ABOUTME: Schedules wakes via status CAS and claims due wakes exactly once

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::{ExecutionStatus, Result, StateStore, WakeRecord};

/// Schedules delayed task executions and hands due ones back to the
/// engine. A wake is claimed by a SCHEDULED to RUNNING status CAS, so
/// concurrent sweepers hand each execution to exactly one claimant.
pub struct DelayScheduler {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl DelayScheduler {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Move a pending execution into the scheduled state and record its
    /// wake time. When the CAS loses (another worker already moved the
    /// execution) the conflict is absorbed and no wake is written.
    pub async fn schedule_wake(
        &self,
        execution_id: &str,
        instance_id: &str,
        delay: Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        let claimed = self
            .store
            .compare_and_set_execution(
                execution_id,
                ExecutionStatus::Pending,
                ExecutionStatus::Scheduled,
            )
            .await?;
        if !claimed {
            debug!(execution_id, "execution already scheduled elsewhere, absorbing");
            return Ok(None);
        }

        let wake_at = self.clock.now() + delay;
        self.store
            .insert_wake(WakeRecord {
                task_execution_id: execution_id.to_string(),
                instance_id: instance_id.to_string(),
                wake_at,
            })
            .await?;

        info!(execution_id, %wake_at, "scheduled delayed execution");
        Ok(Some(wake_at))
    }

    /// Claim every wake that is due at `now`. Each claimed execution is
    /// transitioned SCHEDULED to RUNNING and its wake removed; executions
    /// another sweeper already claimed are skipped.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<WakeRecord>> {
        let mut claimed = Vec::new();
        for wake in self.store.due_wakes(now).await? {
            let won = self
                .store
                .compare_and_set_execution(
                    &wake.task_execution_id,
                    ExecutionStatus::Scheduled,
                    ExecutionStatus::Running,
                )
                .await?;
            if won {
                self.store.remove_wake(&wake.task_execution_id).await?;
                debug!(
                    execution_id = %wake.task_execution_id,
                    "claimed due wake"
                );
                claimed.push(wake);
            } else {
                debug!(
                    execution_id = %wake.task_execution_id,
                    "due wake already claimed elsewhere"
                );
            }
        }
        Ok(claimed)
    }

    /// Whether this execution has ever been scheduled for a wake.
    pub async fn has_wake(&self, execution_id: &str) -> Result<bool> {
        Ok(self.store.wake_for_execution(execution_id).await?.is_some())
    }
}
