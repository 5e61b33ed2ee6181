// ABOUTME: Action dispatch layer with pluggable providers per action kind
// ABOUTME: Personalizes, resolves the recipient, and fans actions out to providers

pub mod personalize;
pub mod recipient;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{ActionConfig, ActionKind, ActionSet, VariableBag};
pub use recipient::Recipient;

/// One outbound action handed to a provider, fully personalized.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub task_execution_id: String,
    pub kind: ActionKind,
    pub config: Value,
    pub recipient: Recipient,
    pub language: Option<String>,
}

/// Executes actions of a single kind against an external channel.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    fn action_kind(&self) -> ActionKind;

    async fn execute(
        &self,
        invocation: ActionInvocation,
    ) -> std::result::Result<Value, String>;
}

/// Outcome of one action within a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// How a multi-action task reacts to individual action failures.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FailurePolicy {
    /// Any failed action fails the task.
    #[default]
    AllRequired,
    /// Failed actions are recorded as warnings; the task completes if at
    /// least one action succeeded.
    BestEffort,
}

/// Everything the engine needs to know about one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub results: Vec<ActionResult>,
    pub warnings: Vec<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
}

/// Routes a task's action set to the registered providers.
pub struct ActionDispatcher {
    providers: HashMap<ActionKind, Arc<dyn ActionProvider>>,
    policy: FailurePolicy,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn register(&mut self, provider: Arc<dyn ActionProvider>) {
        self.providers.insert(provider.action_kind(), provider);
    }

    pub fn supported_kinds(&self) -> Vec<ActionKind> {
        self.providers.keys().copied().collect()
    }

    /// Personalize and execute every action in the set. Actions are
    /// independent of each other and run concurrently.
    pub async fn dispatch(
        &self,
        task_execution_id: &str,
        actions: &ActionSet,
        variables: &VariableBag,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        if actions.is_empty() {
            debug!(task_execution_id, "task has no actions, nothing to dispatch");
            report.success = true;
            return report;
        }

        let recipient = recipient::resolve(&actions.recipient, variables);
        if recipient.is_blank() {
            report
                .warnings
                .push("recipient resolved to no contact details".to_string());
        }

        let invocations: Vec<ActionInvocation> = actions
            .items
            .iter()
            .map(|action| {
                self.prepare(task_execution_id, action, actions, &recipient, variables, &mut report)
            })
            .collect();

        let futures = invocations.into_iter().map(|inv| self.run_one(inv));
        report.results = join_all(futures).await;

        self.apply_policy(task_execution_id, &mut report);
        report
    }

    fn prepare(
        &self,
        task_execution_id: &str,
        action: &ActionConfig,
        actions: &ActionSet,
        recipient: &Recipient,
        variables: &VariableBag,
        report: &mut DispatchReport,
    ) -> ActionInvocation {
        let raw = serde_json::to_value(action).unwrap_or(Value::Null);
        let mut unresolved = Vec::new();
        let config = personalize::render_json(&raw, variables, &mut unresolved);
        for token in unresolved {
            report
                .warnings
                .push(format!("unresolved personalization token '{{{{{}}}}}'", token));
        }

        ActionInvocation {
            task_execution_id: task_execution_id.to_string(),
            kind: action.kind(),
            config,
            recipient: recipient.clone(),
            language: actions.language.clone(),
        }
    }

    async fn run_one(&self, invocation: ActionInvocation) -> ActionResult {
        let kind = invocation.kind;
        match self.providers.get(&kind) {
            Some(provider) => match provider.execute(invocation).await {
                Ok(output) => ActionResult {
                    kind,
                    success: true,
                    output: Some(output),
                    error: None,
                },
                Err(error) => ActionResult {
                    kind,
                    success: false,
                    output: None,
                    error: Some(error),
                },
            },
            None => ActionResult {
                kind,
                success: false,
                output: None,
                error: Some(format!("no provider registered for action kind '{}'", kind)),
            },
        }
    }

    fn apply_policy(&self, task_execution_id: &str, report: &mut DispatchReport) {
        let failed: Vec<&ActionResult> =
            report.results.iter().filter(|r| !r.success).collect();
        let succeeded = report.results.len() - failed.len();

        match self.policy {
            FailurePolicy::AllRequired => {
                report.success = failed.is_empty();
                if !report.success {
                    report.failure_reason = failed
                        .first()
                        .and_then(|r| r.error.clone())
                        .or_else(|| Some("action failed".to_string()));
                }
            }
            FailurePolicy::BestEffort => {
                report.success = succeeded > 0 || report.results.is_empty();
                for result in &failed {
                    warn!(
                        task_execution_id,
                        kind = %result.kind,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "action failed under best-effort policy"
                    );
                    report.warnings.push(format!(
                        "{} action failed: {}",
                        result.kind,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                if !report.success {
                    report.failure_reason = Some("all actions failed".to_string());
                }
            }
        }
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
