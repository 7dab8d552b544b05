//! Test: triggers decide whether a run starts, and the deploy gate decides what ships

use crate::helpers::*;
use gatekeep::core::preset::{DEPLOY_JOB, LINT_JOB, UNIT_JOB};
use gatekeep::core::{Event, ExecutionStatus, JobStatus, SkipReason};
use gatekeep::execution::{should_deploy, ExecutionEvent};

/// A release tag runs lint, the unit matrix and deploy
#[tokio::test]
async fn test_tag_push_deploys() {
    let runner = ScriptedRunner::new();
    let result = run_workflow(bundled_workflow(), &Event::push("refs/tags/v1.2.0"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, LINT_JOB, JobStatus::Success);
    assert_job_status(&result, UNIT_JOB, JobStatus::Success);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Success);
    assert_eq!(result.started_jobs(), vec![LINT_JOB, UNIT_JOB, DEPLOY_JOB]);
    assert_eq!(runner.ran("twine upload"), 1);
}

/// Branch pushes test but never publish
#[tokio::test]
async fn test_branch_push_skips_deploy() {
    let runner = ScriptedRunner::new();
    let result = run_workflow(bundled_workflow(), &Event::push("refs/heads/main"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, UNIT_JOB, JobStatus::Success);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);
    assert!(matches!(
        result.job(DEPLOY_JOB).skip_reason,
        Some(SkipReason::ConditionNotMet { .. })
    ));
    assert!(!result.started_jobs().contains(&DEPLOY_JOB.to_string()));
    assert_eq!(runner.ran("twine"), 0);
}

#[tokio::test]
async fn test_pull_request_skips_deploy() {
    let result = run_workflow(bundled_workflow(), &Event::pull_request("main"), ScriptedRunner::new()).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, LINT_JOB, JobStatus::Success);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);
}

#[tokio::test]
async fn test_scheduled_run() {
    let result = run_workflow(
        bundled_workflow(),
        &Event::schedule(Some("0 6 * * *")),
        ScriptedRunner::new(),
    )
    .await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, UNIT_JOB, JobStatus::Success);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);
}

/// Events no trigger accepts leave the workflow untouched
#[tokio::test]
async fn test_unmatched_events_do_not_run() {
    let unmatched = [
        Event::push("refs/heads/feature/x"),
        Event::push("refs/tags/release-1"),
        Event::pull_request("develop"),
        Event::schedule(Some("0 7 * * *")),
    ];

    for event in &unmatched {
        let runner = ScriptedRunner::new();
        let result = run_workflow(bundled_workflow(), event, runner.clone()).await;

        assert_run_status(&result, ExecutionStatus::NotTriggered);
        assert!(result.report.jobs.is_empty(), "{} ran jobs", event);
        assert!(runner.seen().is_empty(), "{} ran steps", event);
        assert_eq!(result.report.release_gate(), None);
        assert!(matches!(
            result.events.as_slice(),
            [ExecutionEvent::NotTriggered { .. }]
        ));
    }
}

/// The release gate agrees with what the engine actually did
#[tokio::test]
async fn test_release_gate_matches_deploy_outcome() {
    for event in [
        Event::push("refs/tags/v2.0.0"),
        Event::push("refs/heads/main"),
        Event::pull_request("main"),
    ] {
        let result = run_workflow(bundled_workflow(), &event, ScriptedRunner::new()).await;
        let context = result.report.event.clone().unwrap();
        let upstream = result.workflow.upstream_results();

        let deployed = result.job(DEPLOY_JOB).status == JobStatus::Success;
        assert_eq!(should_deploy(&context, &upstream), deployed, "event {}", event);
        assert_eq!(result.report.release_gate(), Some(deployed), "event {}", event);
    }
}

/// A failed lint keeps the gate closed even for a release tag
#[tokio::test]
async fn test_release_gate_closed_after_failure() {
    let runner = ScriptedRunner::new().failing("make lint");
    let result = run_workflow(bundled_workflow(), &Event::push("refs/tags/v2.0.0"), runner).await;

    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);
    assert_eq!(result.report.release_gate(), Some(false));
}
