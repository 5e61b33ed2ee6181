// ABOUTME: Workflow template and task definitions with YAML parsing support
// ABOUTME: Covers actions, delays, branch conditions, and human approval settings

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{GraphValidationError, GraphViolation, Result};

fn unreadable(err: impl std::fmt::Display) -> GraphValidationError {
    GraphViolation::Unreadable {
        reason: err.to_string(),
    }
    .into()
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A published workflow definition. Instances snapshot the template by value
/// at start time, so later edits never affect running instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub workflow_type: Option<String>,
    pub tasks: Vec<WorkflowTask>,
}

/// One step in a workflow. Main-sequence tasks carry a display order;
/// branch tasks carry a parent id and a branch condition instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default)]
    pub is_hitl: bool,
    pub hitl: Option<HitlConfig>,
    #[serde(default)]
    pub delay_amount: u32,
    #[serde(default)]
    pub delay_unit: DelayUnit,
    pub display_order: Option<u32>,
    pub parent_task_id: Option<String>,
    pub branch_condition: Option<BranchCondition>,
}

impl WorkflowTask {
    pub fn is_branch(&self) -> bool {
        self.parent_task_id.is_some()
    }

    /// Delay between becoming eligible and actually executing.
    pub fn delay(&self) -> Duration {
        self.delay_unit.to_duration(self.delay_amount)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    #[default]
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn to_duration(&self, amount: u32) -> Duration {
        let amount = amount as i64;
        match self {
            DelayUnit::Minutes => Duration::minutes(amount),
            DelayUnit::Hours => Duration::hours(amount),
            DelayUnit::Days => Duration::days(amount),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
        }
    }
}

impl std::fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outbound work a task performs when it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub recipient: RecipientRule,
    pub language: Option<String>,
    #[serde(default)]
    pub items: Vec<ActionConfig>,
}

impl ActionSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Who an action is addressed to. Explicit values are treated as a
/// variable key holding contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRule {
    #[default]
    Lead,
    AssignedAgent,
    Owner,
    #[serde(untagged)]
    Explicit(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    VoiceCall {
        first_message: String,
        system_prompt: Option<String>,
        language: Option<String>,
    },
    Sms {
        message: String,
    },
    Email {
        subject: String,
        body: String,
        #[serde(default)]
        html: bool,
    },
    CalendarEvent {
        title: String,
        description: Option<String>,
        duration_minutes: Option<u32>,
    },
    DocumentGeneration {
        template: String,
    },
    CreateTask {
        title: String,
        priority: Option<String>,
    },
    RequestReview {
        message: String,
    },
    RespondToReview {
        message: String,
    },
}

impl ActionConfig {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionConfig::VoiceCall { .. } => ActionKind::VoiceCall,
            ActionConfig::Sms { .. } => ActionKind::Sms,
            ActionConfig::Email { .. } => ActionKind::Email,
            ActionConfig::CalendarEvent { .. } => ActionKind::CalendarEvent,
            ActionConfig::DocumentGeneration { .. } => ActionKind::DocumentGeneration,
            ActionConfig::CreateTask { .. } => ActionKind::CreateTask,
            ActionConfig::RequestReview { .. } => ActionKind::RequestReview,
            ActionConfig::RespondToReview { .. } => ActionKind::RespondToReview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    VoiceCall,
    Sms,
    Email,
    CalendarEvent,
    DocumentGeneration,
    CreateTask,
    RequestReview,
    RespondToReview,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::VoiceCall => "voice_call",
            ActionKind::Sms => "sms",
            ActionKind::Email => "email",
            ActionKind::CalendarEvent => "calendar_event",
            ActionKind::DocumentGeneration => "document_generation",
            ActionKind::CreateTask => "create_task",
            ActionKind::RequestReview => "request_review",
            ActionKind::RespondToReview => "respond_to_review",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_assignee() -> String {
    "owner".to_string()
}

/// Human approval settings for a gated task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlConfig {
    #[serde(default = "default_assignee")]
    pub assignee: String,
    pub message: Option<String>,
    pub deadline_amount: Option<u32>,
    #[serde(default)]
    pub deadline_unit: DelayUnit,
    pub escalation: Option<EscalationConfig>,
}

impl HitlConfig {
    pub fn deadline_duration(&self) -> Option<Duration> {
        self.deadline_amount
            .map(|amount| self.deadline_unit.to_duration(amount))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub agent: String,
    #[serde(default)]
    pub channel: EscalationChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EscalationChannel {
    #[default]
    Sms,
    Call,
    Both,
}

/// Predicate that decides whether a branch task fires after its parent
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCondition {
    pub field: ConditionField,
    pub key: Option<String>,
    pub operator: ConditionOperator,
    pub value: Option<serde_json::Value>,
    pub branch_action: Option<String>,
}

impl BranchCondition {
    /// Variable key this condition reads. Well-known fields map to fixed
    /// keys; custom fields must name one explicitly.
    pub fn resolved_key(&self) -> Option<&str> {
        match self.field {
            ConditionField::Feedback => Some("feedback"),
            ConditionField::OfferStatus => Some("offer_status"),
            ConditionField::InspectionResult => Some("inspection_result"),
            ConditionField::FinancingStatus => Some("financing_status"),
            ConditionField::Custom => self.key.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    Feedback,
    OfferStatus,
    InspectionResult,
    FinancingStatus,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "not_equals",
            ConditionOperator::Contains => "contains",
            ConditionOperator::GreaterThan => "greater_than",
            ConditionOperator::LessThan => "less_than",
            ConditionOperator::IsEmpty => "is_empty",
            ConditionOperator::IsNotEmpty => "is_not_empty",
        }
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl WorkflowTemplate {
    /// Parse a template from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(unreadable)?;
        Self::from_yaml(&content)
    }

    /// Parse a template from a YAML string. Task names default to their ids.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut template: WorkflowTemplate =
            serde_yaml::from_str(content).map_err(unreadable)?;

        for task in &mut template.tasks {
            if task.name.is_none() {
                task.name = Some(task.id.clone());
            }
        }

        Ok(template)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(unreadable)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path.as_ref(), yaml).map_err(unreadable)?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == task_id)
    }

    /// Branch tasks attached to the given parent, in declaration order.
    pub fn branches_of(&self, parent_id: &str) -> Vec<&WorkflowTask> {
        self.tasks
            .iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
            .collect()
    }
}
