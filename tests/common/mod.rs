// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a template builder, recording providers, and an engine harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use flowline::clock::ManualClock;
use flowline::dispatch::ActionInvocation;
use flowline::engine::StaticVariableSource;
use flowline::hitl::LogNotificationSink;
use flowline::{
    ActionDispatcher, ActionKind, ActionProvider, DelayScheduler, ExecutionEngine,
    HitlGateManager, MemoryStore, VariableBag, WorkflowTemplate,
};

/// Builds workflow template YAML for tests without hand-writing every
/// field.
pub struct TestTemplateBuilder {
    id: String,
    name: String,
    tasks: Vec<String>,
}

impl TestTemplateBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Test template {}", id),
            tasks: Vec::new(),
        }
    }

    pub fn add_sms_task(mut self, id: &str, order: u32, message: &str) -> Self {
        self.tasks.push(format!(
            r#"  - id: {id}
    display_order: {order}
    actions:
      items:
        - kind: sms
          message: "{message}"
"#
        ));
        self
    }

    pub fn add_delayed_sms_task(
        mut self,
        id: &str,
        order: u32,
        message: &str,
        delay_amount: u32,
        delay_unit: &str,
    ) -> Self {
        self.tasks.push(format!(
            r#"  - id: {id}
    display_order: {order}
    delay_amount: {delay_amount}
    delay_unit: {delay_unit}
    actions:
      items:
        - kind: sms
          message: "{message}"
"#
        ));
        self
    }

    pub fn add_hitl_task(mut self, id: &str, order: u32, deadline_hours: Option<u32>) -> Self {
        let deadline = match deadline_hours {
            Some(hours) => format!(
                "      deadline_amount: {hours}\n      deadline_unit: hours\n      escalation:\n        agent: broker\n        channel: sms\n"
            ),
            None => String::new(),
        };
        self.tasks.push(format!(
            r#"  - id: {id}
    display_order: {order}
    is_hitl: true
    hitl:
      assignee: owner
      message: "Please review {id}"
{deadline}    actions:
      items:
        - kind: sms
          message: "approved content for {id}"
"#
        ));
        self
    }

    pub fn add_branch_task(
        mut self,
        id: &str,
        parent: &str,
        field: &str,
        operator: &str,
        value: &str,
        message: &str,
    ) -> Self {
        self.tasks.push(format!(
            r#"  - id: {id}
    parent_task_id: {parent}
    branch_condition:
      field: {field}
      operator: {operator}
      value: "{value}"
    actions:
      items:
        - kind: sms
          message: "{message}"
"#
        ));
        self
    }

    pub fn build(self) -> WorkflowTemplate {
        let yaml = format!(
            "id: {}\nname: {}\ntasks:\n{}",
            self.id,
            self.name,
            self.tasks.join("")
        );
        WorkflowTemplate::from_yaml(&yaml).expect("builder produced invalid YAML")
    }
}

/// Provider that records every invocation and succeeds or fails on
/// command.
pub struct RecordingProvider {
    kind: ActionKind,
    pub invocations: Mutex<Vec<ActionInvocation>>,
    pub fail: Mutex<bool>,
}

impl RecordingProvider {
    pub fn new(kind: ActionKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            invocations: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn last_message(&self) -> Option<String> {
        self.invocations
            .lock()
            .unwrap()
            .last()
            .and_then(|inv| inv.config.get("message"))
            .and_then(Value::as_str)
            .map(String::from)
    }
}

#[async_trait]
impl ActionProvider for RecordingProvider {
    fn action_kind(&self) -> ActionKind {
        self.kind
    }

    async fn execute(
        &self,
        invocation: ActionInvocation,
    ) -> std::result::Result<Value, String> {
        let fail = *self.fail.lock().unwrap();
        self.invocations.lock().unwrap().push(invocation);
        if fail {
            Err("simulated provider failure".to_string())
        } else {
            Ok(json!({"delivered": true}))
        }
    }
}

/// A fully wired engine over the in-memory store with a manual clock and
/// a recording SMS provider.
pub struct TestHarness {
    pub engine: ExecutionEngine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sms: Arc<RecordingProvider>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_variables(VariableBag::new())
    }

    pub fn with_variables(runtime: VariableBag) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sms = RecordingProvider::new(ActionKind::Sms);

        let mut dispatcher = ActionDispatcher::new();
        dispatcher.register(sms.clone());

        let scheduler = DelayScheduler::new(store.clone(), clock.clone());
        let gate = HitlGateManager::new(
            store.clone(),
            Arc::new(LogNotificationSink),
            clock.clone(),
        );
        let engine = ExecutionEngine::new(
            store.clone(),
            Arc::new(dispatcher),
            scheduler,
            gate,
            Arc::new(StaticVariableSource::new(runtime)),
            clock.clone(),
        );

        Self {
            engine,
            store,
            clock,
            sms,
        }
    }
}
