//! Test: matrix cells run independently with their own variables

use crate::helpers::*;
use gatekeep::core::preset::UNIT_JOB;
use gatekeep::core::{Event, ExecutionStatus, JobStatus};

#[tokio::test]
async fn test_unit_matrix_runs_every_cell() {
    let runner = ScriptedRunner::new();
    let result = run_workflow(bundled_workflow(), &Event::push("refs/heads/main"), runner.clone()).await;

    assert_job_status(&result, UNIT_JOB, JobStatus::Success);

    let cells: Vec<String> = result.job(UNIT_JOB).cells.iter().map(|c| c.cell.to_string()).collect();
    assert_eq!(cells.len(), 10);
    assert!(cells.contains(&"(3.6, macos)".to_string()));
    assert!(cells.contains(&"(3.9, windows)".to_string()));
    assert!(!cells.contains(&"(3.7, macos)".to_string()));
    assert!(!cells.contains(&"(3.8, macos)".to_string()));

    // One pytest per cell
    assert_eq!(runner.ran("pytest tests"), 10);
}

#[tokio::test]
async fn test_cell_variables_reach_steps() {
    let runner = ScriptedRunner::new();
    let result = run_workflow(bundled_workflow(), &Event::push("refs/heads/main"), runner.clone()).await;

    let cell = result
        .job(UNIT_JOB)
        .cells
        .iter()
        .find(|c| c.cell.to_string() == "(3.7, ubuntu)")
        .unwrap();
    let names: Vec<&str> = cell.steps.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Setup Python 3.7"));

    let pytest = runner
        .seen()
        .into_iter()
        .find(|s| s.cell == "(3.7, ubuntu)" && s.command.as_deref() == Some("pytest tests"))
        .unwrap();
    assert_eq!(pytest.env.get("COLOR"), Some(&"yes".to_string()));
    assert_eq!(pytest.env.get("FORCE_COLOR"), Some(&"1".to_string()));

    let commands = runner.commands_for_cell("(3.7, ubuntu)");
    assert!(commands.contains(&"codecov -f ./coverage.xml -F unit".to_string()));
}

#[tokio::test]
async fn test_include_and_max_parallel() {
    let yaml = r#"
name: matrix
on: { push: {} }
jobs:
  - id: build
    strategy:
      max-parallel: 1
      matrix:
        target: [x86, arm]
        include:
          - target: riscv
            experimental: "true"
    steps:
      - run: "build --target ${{ matrix.target }} --experimental=${{ matrix.experimental }}"
"#;
    let runner = ScriptedRunner::new();
    let result = run_workflow(workflow_from_yaml(yaml), &Event::push("refs/heads/main"), runner.clone()).await;

    assert_run_status(&result, ExecutionStatus::Completed);
    assert_eq!(result.job("build").cells.len(), 3);

    let mut commands: Vec<String> = runner.seen().into_iter().filter_map(|s| s.command).collect();
    commands.sort();
    assert_eq!(
        commands,
        vec![
            "build --target arm --experimental=",
            "build --target riscv --experimental=true",
            "build --target x86 --experimental=",
        ]
    );
}
