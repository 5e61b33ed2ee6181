// ABOUTME: Status reporting structures for instances and the engine as a whole
// ABOUTME: Summarizes progress, per-task outcomes, and open approvals

use serde::{Deserialize, Serialize};

use crate::store::{ExecutionStatus, InstanceStatus};

/// Point-in-time view of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatusReport {
    pub instance_id: String,
    pub template_id: String,
    pub status: InstanceStatus,
    /// Share of main-sequence tasks whose latest execution is terminal.
    pub progress_percent: u8,
    pub tasks: Vec<TaskStatusEntry>,
    pub open_approvals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEntry {
    pub task_id: String,
    pub name: String,
    pub is_branch: bool,
    pub status: Option<ExecutionStatus>,
    pub attempt: Option<u32>,
    pub failure_reason: Option<String>,
}

/// Aggregate counts across every instance the store knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: usize,
    pub paused: usize,
    pub waiting_hitl: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl EngineStats {
    pub fn record(&mut self, status: InstanceStatus) {
        match status {
            InstanceStatus::Running => self.running += 1,
            InstanceStatus::Paused => self.paused += 1,
            InstanceStatus::WaitingHitl => self.waiting_hitl += 1,
            InstanceStatus::Completed => self.completed += 1,
            InstanceStatus::Failed => self.failed += 1,
            InstanceStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.running + self.paused + self.waiting_hitl + self.completed + self.failed
            + self.cancelled
    }
}
