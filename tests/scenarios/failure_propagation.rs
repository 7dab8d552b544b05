//! Test: failures stop dependents but never siblings

use crate::helpers::*;
use gatekeep::core::preset::{DEPLOY_JOB, LINT_JOB, UNIT_JOB};
use gatekeep::core::{Event, ExecutionStatus, JobStatus, SkipReason};

/// Lint failure skips everything downstream without running it
#[tokio::test]
async fn test_lint_failure_blocks_unit_and_deploy() {
    let runner = ScriptedRunner::new().failing("make lint");
    let result = run_workflow(bundled_workflow(), &Event::push("refs/tags/v1.0.0"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Failed);
    assert_job_status(&result, LINT_JOB, JobStatus::Failure);
    assert_job_status(&result, UNIT_JOB, JobStatus::Skipped);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);

    assert_eq!(
        result.job(UNIT_JOB).skip_reason,
        Some(SkipReason::UpstreamFailure {
            job: LINT_JOB.to_string(),
            status: JobStatus::Failure,
        })
    );
    assert_eq!(result.started_jobs(), vec![LINT_JOB]);
    assert_eq!(runner.ran("pytest"), 0);
    assert_eq!(runner.ran("twine"), 0);

    assert_eq!(result.workflow.state.failed_jobs, 1);
    assert_eq!(result.workflow.state.skipped_jobs, 2);
}

/// Unit failing on every cell stops a release
#[tokio::test]
async fn test_unit_failure_blocks_deploy_on_tag() {
    let runner = ScriptedRunner::new().failing("pytest tests");
    let result = run_workflow(bundled_workflow(), &Event::push("refs/tags/v1.0.0"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Failed);
    assert_job_status(&result, UNIT_JOB, JobStatus::Failure);
    assert_job_status(&result, DEPLOY_JOB, JobStatus::Skipped);
    assert!(matches!(
        &result.job(DEPLOY_JOB).skip_reason,
        Some(SkipReason::UpstreamFailure { job, .. }) if job == UNIT_JOB
    ));

    let error = result.job(UNIT_JOB).error.clone().unwrap();
    assert!(error.starts_with("cell ("), "{}", error);
    assert!(error.contains("Run unittests"), "{}", error);
    assert_eq!(runner.ran("twine"), 0);
}

/// One broken cell fails the job while its siblings still finish
#[tokio::test]
async fn test_single_cell_failure_is_isolated() {
    let yaml = r#"
name: cells
on: { push: {} }
jobs:
  - id: unit
    strategy:
      matrix:
        python-version: ['3.6', '3.7', '3.8']
    steps:
      - run: "pytest --python ${{ matrix.python-version }}"
      - run: "report ${{ matrix.python-version }}"
"#;
    let runner = ScriptedRunner::new().failing("pytest --python 3.7");
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("main"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Failed);
    assert_job_status(&result, "unit", JobStatus::Failure);
    assert_eq!(failed_cells(&result, "unit"), vec!["(3.7)"]);

    assert_eq!(runner.ran("report 3.6"), 1);
    assert_eq!(runner.ran("report 3.8"), 1);
    assert_eq!(runner.ran("report 3.7"), 0);
}

#[tokio::test]
async fn test_unknown_action_fails_job() {
    let yaml = r#"
name: actions
on: { push: {} }
jobs:
  - id: lint
    steps:
      - uses: actions/checkout@v2
      - uses: someone/unknown-action@v3
      - run: make lint
"#;
    let runner = ScriptedRunner::new();
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("main"), runner.clone()).await;

    assert_job_status(&result, "lint", JobStatus::Failure);
    let error = result.job("lint").error.clone().unwrap();
    assert!(error.contains("unsupported action"), "{}", error);
    assert_eq!(runner.ran("make lint"), 0);
}

/// Independent jobs keep going when a sibling fails
#[tokio::test]
async fn test_independent_job_unaffected() {
    let yaml = r#"
name: siblings
on: { push: {} }
jobs:
  - id: docs
    steps: [{ run: "make docs" }]
  - id: lint
    steps: [{ run: "make lint" }]
  - id: unit
    needs: [lint]
    steps: [{ run: "pytest" }]
"#;
    let runner = ScriptedRunner::new().failing("make lint");
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("main"), runner).await;

    assert_run_status(&result, ExecutionStatus::Failed);
    assert_job_status(&result, "docs", JobStatus::Success);
    assert_job_status(&result, "lint", JobStatus::Failure);
    assert_job_status(&result, "unit", JobStatus::Skipped);
}
