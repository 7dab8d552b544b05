//! Test: per-cell wall-clock limits

use crate::helpers::*;
use gatekeep::core::{CellStatus, Event, ExecutionStatus, JobStatus, SkipReason};
use gatekeep::execution::{JobExecutor, SchedulingStrategy};
use std::time::{Duration, Instant};

const YAML: &str = r#"
name: timeouts
on: { push: {} }
jobs:
  - id: unit
    strategy:
      matrix:
        shard: [a, b]
    steps:
      - run: "pytest shard-${{ matrix.shard }}"
  - id: docs
    steps: [{ run: "make docs" }]
  - id: deploy
    needs: [unit]
    steps: [{ run: "twine upload" }]
"#;

fn with_unit_timeout(millis: u64) -> gatekeep::core::Workflow {
    let mut workflow = workflow_from_yaml(YAML);
    workflow.job_mut("unit").unwrap().timeout = Duration::from_millis(millis);
    workflow
}

#[tokio::test]
async fn test_slow_cells_time_out() {
    let runner = ScriptedRunner::new().delaying("pytest", Duration::from_secs(30));
    let started = Instant::now();
    let result = run_workflow(with_unit_timeout(50), &Event::push("main"), runner).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_run_status(&result, ExecutionStatus::Failed);
    assert_job_status(&result, "unit", JobStatus::TimedOut);
    assert!(result
        .job("unit")
        .cells
        .iter()
        .all(|c| matches!(c.status, CellStatus::TimedOut { .. })));

    assert_job_status(&result, "docs", JobStatus::Success);
    assert_job_status(&result, "deploy", JobStatus::Skipped);
    assert_eq!(
        result.job("deploy").skip_reason,
        Some(SkipReason::UpstreamFailure {
            job: "unit".to_string(),
            status: JobStatus::TimedOut,
        })
    );
}

/// A timeout mixed with an ordinary failure collapses to a failure
#[tokio::test]
async fn test_timeout_and_failure_collapse_to_failure() {
    let runner = ScriptedRunner::new()
        .delaying("shard-a", Duration::from_secs(30))
        .failing("shard-b");
    let result = run_workflow(with_unit_timeout(50), &Event::push("main"), runner).await;

    assert_job_status(&result, "unit", JobStatus::Failure);
    assert_eq!(failed_cells(&result, "unit").len(), 2);
}

#[tokio::test]
async fn test_fast_cells_within_budget() {
    let runner = ScriptedRunner::new().delaying("pytest", Duration::from_millis(10));
    let workspace = tempfile::tempdir().unwrap();
    let result = run_with_executor(
        with_unit_timeout(5_000),
        &Event::push("main"),
        JobExecutor::new(runner, workspace.path()),
        SchedulingStrategy::Sequential,
    )
    .await
    .unwrap();

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_job_status(&result, "deploy", JobStatus::Success);
}
