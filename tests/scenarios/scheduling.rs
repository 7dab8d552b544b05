//! Test: scheduling strategies bound how many jobs run at once

use crate::helpers::*;
use gatekeep::core::{Event, ExecutionStatus};
use gatekeep::execution::{ExecutionEvent, JobExecutor, SchedulingStrategy};
use std::time::Duration;

const YAML: &str = r#"
name: fan-out
on: { push: {} }
jobs:
  - id: docs
    steps: [{ run: "make docs" }]
  - id: lint
    steps: [{ run: "make lint" }]
  - id: typecheck
    steps: [{ run: "mypy" }]
"#;

/// Highest number of jobs running at the same time, from the event stream
fn peak_concurrency(events: &[ExecutionEvent]) -> usize {
    let mut running = 0usize;
    let mut peak = 0usize;
    for event in events {
        match event {
            ExecutionEvent::JobStarted { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            ExecutionEvent::JobFinished { .. } => running = running.saturating_sub(1),
            _ => {}
        }
    }
    peak
}

async fn run(strategy: SchedulingStrategy) -> WorkflowTestResult {
    let runner = ScriptedRunner::new().delaying("m", Duration::from_millis(20));
    let workspace = tempfile::tempdir().unwrap();
    run_with_executor(
        workflow_from_yaml(YAML),
        &Event::push("main"),
        JobExecutor::new(runner, workspace.path()),
        strategy,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_sequential_runs_one_job_at_a_time() {
    let result = run(SchedulingStrategy::Sequential).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_eq!(peak_concurrency(&result.events), 1);
    assert_eq!(result.started_jobs().len(), 3);
}

#[tokio::test]
async fn test_limited_parallel_respects_limit() {
    let result = run(SchedulingStrategy::LimitedParallel(2)).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_eq!(peak_concurrency(&result.events), 2);
}

#[tokio::test]
async fn test_parallel_starts_all_ready_jobs() {
    let result = run(SchedulingStrategy::Parallel).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_eq!(peak_concurrency(&result.events), 3);
}
