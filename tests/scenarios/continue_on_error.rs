//! Test: continue-on-error steps record failure without failing the cell

use crate::helpers::*;
use gatekeep::core::preset::{DEPLOY_JOB, UNIT_JOB};
use gatekeep::core::{Event, ExecutionStatus, JobStatus, StepStatus};

/// A flaky coverage upload must not block a release
#[tokio::test]
async fn test_coverage_upload_failure_is_ignored() {
    let runner = ScriptedRunner::new().failing("codecov");
    let result = run_workflow(bundled_workflow(), &Event::push("refs/tags/v1.0.0"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, UNIT_JOB, JobStatus::Success);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Success);

    let steps = step_statuses(&result, UNIT_JOB);
    assert_eq!(
        steps.last(),
        Some(&("Upload coverage".to_string(), StepStatus::FailedIgnored))
    );
    assert!(steps[..steps.len() - 1]
        .iter()
        .all(|(_, status)| *status == StepStatus::Success));
    assert_eq!(runner.ran("codecov"), 10);
}

#[tokio::test]
async fn test_later_steps_still_run() {
    let yaml = r#"
name: tolerant
on: { push: {} }
jobs:
  - id: check
    steps:
      - name: Optional
        run: "optional-check"
        continue-on-error: true
      - name: Required
        run: "required-check"
"#;
    let runner = ScriptedRunner::new().failing("optional-check");
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("main"), runner.clone()).await;

    assert_job_status(&result, "check", JobStatus::Success);
    assert_eq!(
        step_statuses(&result, "check"),
        vec![
            ("Optional".to_string(), StepStatus::FailedIgnored),
            ("Required".to_string(), StepStatus::Success),
        ]
    );
    assert_eq!(runner.ran("required-check"), 1);
}

/// Without the flag the first failure ends the cell
#[tokio::test]
async fn test_failure_stops_remaining_steps() {
    let yaml = r#"
name: strict
on: { push: {} }
jobs:
  - id: check
    steps:
      - name: First
        run: "first-check"
      - name: Second
        run: "second-check"
"#;
    let runner = ScriptedRunner::new().failing("first-check");
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("main"), runner.clone()).await;

    assert_job_status(&result, "check", JobStatus::Failure);
    assert_eq!(
        step_statuses(&result, "check"),
        vec![("First".to_string(), StepStatus::Failed)]
    );
    assert_eq!(runner.ran("second-check"), 0);
}
