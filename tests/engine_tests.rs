// ABOUTME: Integration tests for the instance execution engine
// ABOUTME: Covers the full lifecycle: branches, delays, approvals, retries, and sweeps

mod common;

use chrono::Duration;
use common::{TestHarness, TestTemplateBuilder};
use flowline::{
    ApprovalStatus, Clock, EngineError, ExecutionStatus, HitlError, InstanceStatus, StateStore,
    VariableBag,
};

fn lead_variables(extra: &[(&str, &str)]) -> VariableBag {
    let mut bag = VariableBag::new();
    bag.set("lead_phone", "+15550100");
    bag.set("first_name", "Dana");
    for (key, value) in extra {
        bag.set(*key, *value);
    }
    bag
}

#[tokio::test]
async fn test_straight_line_instance_completes() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("straight")
        .add_sms_task("hello", 0, "Hello {{first_name}}")
        .add_sms_task("goodbye", 1, "Goodbye {{first_name}}")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("straight", lead_variables(&[]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert!(instance.completed_at.is_some());
    assert_eq!(harness.sms.invocation_count(), 2);
    assert_eq!(harness.sms.last_message().as_deref(), Some("Goodbye Dana"));
}

#[tokio::test]
async fn test_hitl_task_parks_instance_until_approved() {
    // Task A runs, task B is approval gated: the instance must wait.
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("gated")
        .add_sms_task("intro", 0, "intro")
        .add_hitl_task("review", 1, None)
        .add_sms_task("outro", 2, "outro")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("gated", lead_variables(&[]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::WaitingHitl);
    assert_eq!(harness.sms.invocation_count(), 1);

    let approvals = harness.store.open_approvals(&instance_id).await.unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].assignee, "owner");

    harness
        .engine
        .approve_hitl(&approvals[0].id, Some("go ahead".to_string()))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    // The gated task's own actions do not fire on approval; only the
    // downstream task runs.
    assert_eq!(harness.sms.invocation_count(), 2);
    assert_eq!(harness.sms.last_message().as_deref(), Some("outro"));
}

#[tokio::test]
async fn test_rejection_pauses_instance_and_never_resumes_alone() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("rejected")
        .add_hitl_task("review", 0, None)
        .add_sms_task("after", 1, "should not send")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("rejected", lead_variables(&[]))
        .await
        .unwrap();

    let approvals = harness.store.open_approvals(&instance_id).await.unwrap();

    // Rejection requires a reason
    let err = harness
        .engine
        .reject_hitl(&approvals[0].id, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Hitl(HitlError::ReasonRequired)));

    harness
        .engine
        .reject_hitl(&approvals[0].id, "comps are stale")
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Paused);

    // Sweeps and explicit runs leave a paused instance alone
    harness.engine.sweep(harness.clock.now()).await.unwrap();
    harness.engine.run_instance(&instance_id).await.unwrap();
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Paused);
    assert_eq!(harness.sms.invocation_count(), 0);
}

#[tokio::test]
async fn test_retry_reopens_rejected_gate() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("retry_gate")
        .add_hitl_task("review", 0, None)
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("retry_gate", lead_variables(&[]))
        .await
        .unwrap();

    let approvals = harness.store.open_approvals(&instance_id).await.unwrap();
    harness
        .engine
        .reject_hitl(&approvals[0].id, "wrong draft")
        .await
        .unwrap();

    let rejected = harness
        .store
        .latest_execution(&instance_id, "review")
        .await
        .unwrap()
        .unwrap();
    harness.engine.retry_task(&rejected.id).await.unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::WaitingHitl);

    let approvals = harness.store.open_approvals(&instance_id).await.unwrap();
    assert_eq!(approvals.len(), 1);

    harness
        .engine
        .approve_hitl(&approvals[0].id, None)
        .await
        .unwrap();
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn test_branch_fires_on_matching_condition() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("branching")
        .add_sms_task("ask", 0, "How was the showing?")
        .add_branch_task(
            "happy_path",
            "ask",
            "feedback",
            "equals",
            "positive",
            "Great, let's make an offer",
        )
        .add_sms_task("wrap_up", 1, "wrap up")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("branching", lead_variables(&[("feedback", "positive")]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(harness.sms.invocation_count(), 3);

    let branch_exec = harness
        .store
        .latest_execution(&instance_id, "happy_path")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch_exec.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_branch_skipped_on_non_matching_condition() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("branching")
        .add_sms_task("ask", 0, "How was the showing?")
        .add_branch_task(
            "happy_path",
            "ask",
            "feedback",
            "equals",
            "positive",
            "Great, let's make an offer",
        )
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("branching", lead_variables(&[("feedback", "negative")]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(harness.sms.invocation_count(), 1);

    // A skipped branch still gets an execution record
    let branch_exec = harness
        .store
        .latest_execution(&instance_id, "happy_path")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch_exec.status, ExecutionStatus::Skipped);
}

#[tokio::test]
async fn test_delayed_task_waits_for_sweep() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("delayed")
        .add_sms_task("now", 0, "immediate")
        .add_delayed_sms_task("later", 1, "one hour later", 60, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("delayed", lead_variables(&[]))
        .await
        .unwrap();

    // Parked on the delay, still running
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(harness.sms.invocation_count(), 1);

    // Thirty minutes in, nothing is due
    harness.clock.advance(Duration::minutes(30));
    assert_eq!(harness.engine.sweep(harness.clock.now()).await.unwrap(), 0);
    assert_eq!(harness.sms.invocation_count(), 1);

    // Past the hour the wake fires exactly once
    harness.clock.advance(Duration::minutes(31));
    assert_eq!(harness.engine.sweep(harness.clock.now()).await.unwrap(), 1);
    assert_eq!(harness.sms.invocation_count(), 2);
    assert_eq!(
        harness.sms.last_message().as_deref(),
        Some("one hour later")
    );

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);

    // A second sweep finds nothing
    assert_eq!(harness.engine.sweep(harness.clock.now()).await.unwrap(), 0);
    assert_eq!(harness.sms.invocation_count(), 2);
}

#[tokio::test]
async fn test_unresolved_token_sends_literal_with_warning() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("tokens")
        .add_sms_task("greet", 0, "Hi {{firstName}}, welcome!")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("tokens", lead_variables(&[]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(
        harness.sms.last_message().as_deref(),
        Some("Hi {{firstName}}, welcome!")
    );

    let exec = harness
        .store
        .latest_execution(&instance_id, "greet")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(exec.warnings.iter().any(|w| w.contains("firstName")));
}

#[tokio::test]
async fn test_failed_task_does_not_halt_instance() {
    // A dispatch failure stays on the execution record; the instance
    // advances past it and the downstream task still runs.
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("failing")
        .add_sms_task("flaky", 0, "will fail")
        .add_branch_task(
            "follow",
            "flaky",
            "feedback",
            "is_not_empty",
            "",
            "never sent",
        )
        .add_delayed_sms_task("after", 1, "still sent", 10, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    harness.sms.set_fail(true);
    let instance_id = harness
        .engine
        .start_instance("failing", lead_variables(&[("feedback", "positive")]))
        .await
        .unwrap();

    // The failure is recorded, the instance keeps running, and the next
    // task is parked on its delay as usual
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);

    let flaky_exec = harness
        .store
        .latest_execution(&instance_id, "flaky")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flaky_exec.status, ExecutionStatus::Failed);
    assert!(flaky_exec.failure_reason.is_some());

    // Branches of the failed task cannot be evaluated and are skipped
    let branch_exec = harness
        .store
        .latest_execution(&instance_id, "follow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch_exec.status, ExecutionStatus::Skipped);

    harness.sms.set_fail(false);
    harness.clock.advance(Duration::minutes(11));
    harness.engine.sweep(harness.clock.now()).await.unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(harness.sms.last_message().as_deref(), Some("still sent"));
}

#[tokio::test]
async fn test_retry_reopens_completed_instance_and_reevaluates_branch() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("reopening")
        .add_sms_task("flaky", 0, "will fail")
        .add_branch_task(
            "follow",
            "flaky",
            "feedback",
            "is_not_empty",
            "",
            "sent on retry",
        )
        .add_sms_task("wrap_up", 1, "wrap up")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    harness.sms.set_fail(true);
    let instance_id = harness
        .engine
        .start_instance("reopening", lead_variables(&[("feedback", "positive")]))
        .await
        .unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);

    // Retrying the failed execution rewinds the cursor, reruns the task,
    // and gives its branch a fresh evaluation
    harness.sms.set_fail(false);
    let failed = harness
        .store
        .latest_execution(&instance_id, "flaky")
        .await
        .unwrap()
        .unwrap();
    harness.engine.retry_task(&failed.id).await.unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);

    let flaky_exec = harness
        .store
        .latest_execution(&instance_id, "flaky")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flaky_exec.status, ExecutionStatus::Completed);
    assert_eq!(flaky_exec.attempt, 2);

    let branch_exec = harness
        .store
        .latest_execution(&instance_id, "follow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch_exec.status, ExecutionStatus::Completed);
    assert_eq!(branch_exec.attempt, 2);
    assert_eq!(harness.sms.last_message().as_deref(), Some("sent on retry"));
}

#[tokio::test]
async fn test_retry_skips_task_delay() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("retry_delay")
        .add_delayed_sms_task("slow", 0, "delayed send", 2, "hours")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    harness.sms.set_fail(true);
    let instance_id = harness
        .engine
        .start_instance("retry_delay", lead_variables(&[]))
        .await
        .unwrap();

    harness.clock.advance(Duration::hours(3));
    harness.engine.sweep(harness.clock.now()).await.unwrap();
    let failed = harness
        .store
        .latest_execution(&instance_id, "slow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);

    // The retry runs immediately instead of waiting another two hours
    harness.sms.set_fail(false);
    harness.engine.retry_task(&failed.id).await.unwrap();
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);

    let exec = harness
        .store
        .latest_execution(&instance_id, "slow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exec.attempt, 2);
    assert_eq!(exec.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_pause_holds_due_wakes_until_resume() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("pausable")
        .add_delayed_sms_task("later", 0, "delayed", 30, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("pausable", lead_variables(&[]))
        .await
        .unwrap();

    harness.engine.pause_instance(&instance_id).await.unwrap();

    // The wake comes due while paused; the sweep claims it but hands the
    // execution back instead of running it.
    harness.clock.advance(Duration::minutes(45));
    harness.engine.sweep(harness.clock.now()).await.unwrap();
    assert_eq!(harness.sms.invocation_count(), 0);
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Paused);

    // Resume re-schedules the delay from now
    harness.engine.resume_instance(&instance_id).await.unwrap();
    harness.clock.advance(Duration::minutes(31));
    harness.engine.sweep(harness.clock.now()).await.unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(harness.sms.invocation_count(), 1);
}

#[tokio::test]
async fn test_cancel_drops_scheduled_wakes() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("cancellable")
        .add_delayed_sms_task("later", 0, "delayed", 30, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("cancellable", lead_variables(&[]))
        .await
        .unwrap();

    harness.engine.cancel_instance(&instance_id).await.unwrap();
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Cancelled);

    harness.clock.advance(Duration::hours(1));
    assert_eq!(harness.engine.sweep(harness.clock.now()).await.unwrap(), 0);
    assert_eq!(harness.sms.invocation_count(), 0);

    // Terminal instances cannot be cancelled again
    let err = harness
        .engine
        .cancel_instance(&instance_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn test_retry_refused_on_cancelled_instance() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("cancelled_retry")
        .add_sms_task("flaky", 0, "will fail")
        .add_delayed_sms_task("later", 1, "never runs", 30, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    harness.sms.set_fail(true);
    let instance_id = harness
        .engine
        .start_instance("cancelled_retry", lead_variables(&[]))
        .await
        .unwrap();

    let failed = harness
        .store
        .latest_execution(&instance_id, "flaky")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);

    harness.engine.cancel_instance(&instance_id).await.unwrap();

    // Cancellation is terminal; the failed execution stays dead
    harness.sms.set_fail(false);
    let err = harness.engine.retry_task(&failed.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_refuses_approval_resolution() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("cancel_gate")
        .add_hitl_task("review", 0, None)
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("cancel_gate", lead_variables(&[]))
        .await
        .unwrap();

    let approvals = harness.store.open_approvals(&instance_id).await.unwrap();
    harness.engine.cancel_instance(&instance_id).await.unwrap();

    let err = harness
        .engine
        .approve_hitl(&approvals[0].id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Hitl(HitlError::InstanceFinished(_))
    ));
}

#[tokio::test]
async fn test_overdue_approval_escalates_once_and_stays_open() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("escalating")
        .add_hitl_task("review", 0, Some(2))
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("escalating", lead_variables(&[]))
        .await
        .unwrap();

    harness.clock.advance(Duration::hours(3));
    let escalated = harness
        .engine
        .escalate_overdue(harness.clock.now())
        .await
        .unwrap();
    assert_eq!(escalated.len(), 1);

    let approval = harness.store.get_approval(&escalated[0]).await.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Escalated);

    // Second pass finds nothing new
    assert!(harness
        .engine
        .escalate_overdue(harness.clock.now())
        .await
        .unwrap()
        .is_empty());

    // Escalated approvals remain resolvable
    harness
        .engine
        .approve_hitl(&approval.id, None)
        .await
        .unwrap();
    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn test_instance_snapshots_template_at_start() {
    let harness = TestHarness::new();
    let original = TestTemplateBuilder::new("versioned")
        .add_sms_task("now", 0, "first")
        .add_delayed_sms_task("later", 1, "original copy", 10, "minutes")
        .build();

    harness.engine.publish_template(original).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("versioned", lead_variables(&[]))
        .await
        .unwrap();

    // Republish with changed content while the instance is parked
    let edited = TestTemplateBuilder::new("versioned")
        .add_sms_task("now", 0, "first")
        .add_delayed_sms_task("later", 1, "edited copy", 10, "minutes")
        .build();
    harness.engine.publish_template(edited).await.unwrap();

    harness.clock.advance(Duration::minutes(11));
    harness.engine.sweep(harness.clock.now()).await.unwrap();

    let instance = harness.store.get_instance(&instance_id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(
        harness.sms.last_message().as_deref(),
        Some("original copy")
    );
}

#[tokio::test]
async fn test_status_report_and_stats() {
    let harness = TestHarness::new();
    let template = TestTemplateBuilder::new("reportable")
        .add_sms_task("first", 0, "one")
        .add_delayed_sms_task("second", 1, "two", 15, "minutes")
        .build();

    harness.engine.publish_template(template).await.unwrap();
    let instance_id = harness
        .engine
        .start_instance("reportable", lead_variables(&[]))
        .await
        .unwrap();

    let report = harness.engine.instance_status(&instance_id).await.unwrap();
    assert_eq!(report.status, InstanceStatus::Running);
    assert_eq!(report.progress_percent, 50);
    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.tasks[0].status, Some(ExecutionStatus::Completed));
    assert_eq!(report.tasks[1].status, Some(ExecutionStatus::Scheduled));

    let stats = harness.engine.engine_stats().await.unwrap();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.total(), 1);

    harness.clock.advance(Duration::minutes(16));
    harness.engine.sweep(harness.clock.now()).await.unwrap();

    let report = harness.engine.instance_status(&instance_id).await.unwrap();
    assert_eq!(report.status, InstanceStatus::Completed);
    assert_eq!(report.progress_percent, 100);
}

#[tokio::test]
async fn test_start_unknown_template_fails() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .start_instance("nope", VariableBag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotFound(_)));
}
