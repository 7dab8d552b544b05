//! Test: the dependency cache speeds runs up without changing their outcome

use crate::helpers::*;
use gatekeep::cache::{CacheKey, CacheStore, FsCacheStore, InMemoryCacheStore};
use gatekeep::core::preset::{DEPLOY_JOB, LINT_JOB, UNIT_JOB};
use gatekeep::core::{CacheStatus, Event, ExecutionStatus, JobStatus};
use gatekeep::execution::{cell_workdir, JobExecutor, SchedulingStrategy};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn pip_runner() -> ScriptedRunner {
    ScriptedRunner::new().writing("pip install --cache-dir", ".cache/pip/wheels.txt")
}

fn seed_workspace(dir: &Path) {
    std::fs::write(dir.join("requirements.txt"), "pytest==6.2\n").unwrap();
    std::fs::write(dir.join("requirements-lint.txt"), "flake8==3.9\n").unwrap();
    std::fs::write(dir.join("setup.py"), "from setuptools import setup\n").unwrap();
}

fn cache_statuses(result: &WorkflowTestResult, job: &str) -> Vec<CacheStatus> {
    result.job(job).cells.iter().map(|c| c.cache).collect()
}

/// Cold and warm runs end the same way; only the cache status differs
#[tokio::test]
async fn test_warm_and_cold_runs_agree() {
    let workspace = tempfile::tempdir().unwrap();
    seed_workspace(workspace.path());
    let cache = Arc::new(InMemoryCacheStore::new());
    let event = Event::push("refs/tags/v1.0.0");

    let cold = run_with_executor(
        bundled_workflow(),
        &event,
        cached_executor(pip_runner(), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    assert_run_status(&cold, ExecutionStatus::Completed);
    assert!(cache_statuses(&cold, UNIT_JOB).iter().all(|s| *s == CacheStatus::Miss));
    assert_eq!(cache_statuses(&cold, DEPLOY_JOB), vec![CacheStatus::Disabled]);
    // One entry for lint plus one per unit cell
    assert_eq!(cache.len().await, 11);

    let warm = run_with_executor(
        bundled_workflow(),
        &event,
        cached_executor(pip_runner(), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    assert!(cache_statuses(&warm, LINT_JOB).iter().all(|s| *s == CacheStatus::Hit));
    assert!(cache_statuses(&warm, UNIT_JOB).iter().all(|s| *s == CacheStatus::Hit));
    assert_eq!(cache.len().await, 11);

    assert_eq!(warm.report.status, cold.report.status);
    for job in [LINT_JOB, UNIT_JOB, DEPLOY_JOB] {
        assert_eq!(warm.job(job).status, cold.job(job).status, "job {}", job);
        assert_eq!(warm.job(job).cells.len(), cold.job(job).cells.len(), "job {}", job);
    }
}

/// Editing a manifest retires the keys that hash it
#[tokio::test]
async fn test_manifest_change_invalidates_keys() {
    let workspace = tempfile::tempdir().unwrap();
    seed_workspace(workspace.path());
    let cache = Arc::new(InMemoryCacheStore::new());
    let event = Event::push("refs/heads/main");

    run_with_executor(
        bundled_workflow(),
        &event,
        cached_executor(pip_runner(), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    std::fs::write(workspace.path().join("requirements.txt"), "pytest==7.0\n").unwrap();

    let second = run_with_executor(
        bundled_workflow(),
        &event,
        cached_executor(pip_runner(), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    assert!(cache_statuses(&second, LINT_JOB).iter().all(|s| *s == CacheStatus::Hit));
    assert!(cache_statuses(&second, UNIT_JOB).iter().all(|s| *s == CacheStatus::Miss));
    assert_eq!(cache.len().await, 21);
}

/// Only successful cells write back
#[tokio::test]
async fn test_failed_cells_do_not_save() {
    let workspace = tempfile::tempdir().unwrap();
    seed_workspace(workspace.path());
    let cache = Arc::new(InMemoryCacheStore::new());

    let result = run_with_executor(
        bundled_workflow(),
        &Event::push("refs/heads/main"),
        cached_executor(pip_runner().failing("make lint"), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    assert_job_status(&result, LINT_JOB, JobStatus::Failure);
    assert_eq!(cache_statuses(&result, LINT_JOB), vec![CacheStatus::Miss]);
    assert_eq!(cache.len().await, 0);
}

/// The on-disk store restores what an earlier run saved
#[tokio::test]
async fn test_filesystem_store_restores_files() {
    let workspace = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_workspace(workspace.path());

    let yaml = r#"
name: fs-cache
on: { push: {} }
jobs:
  - id: lint
    cache:
      purpose: lint
      path: .cache/pip
      manifests: [requirements-lint.txt]
      os: ubuntu
      version: "3.9"
    steps:
      - run: python -m pip install --cache-dir .cache/pip -r requirements-lint.txt
"#;

    let event = Event::push("main");
    let run = |runner: ScriptedRunner| {
        let store: Arc<dyn CacheStore> = Arc::new(FsCacheStore::new(store_dir.path()));
        let executor = JobExecutor::new(runner, workspace.path()).with_cache(store);
        run_with_executor(workflow_from_yaml(yaml), &event, executor, SchedulingStrategy::Parallel)
    };

    let first = run(pip_runner()).await.unwrap();
    assert_eq!(cache_statuses(&first, "lint"), vec![CacheStatus::Miss]);
    let key = first.job("lint").cells[0].cache_key.clone().unwrap();
    assert!(key.starts_with("lint-ubuntu-3.9-"), "{}", key);

    // The second run installs nothing into a fresh cell directory, so the
    // file can only come from the store
    let second = run(ScriptedRunner::new()).await.unwrap();
    assert_eq!(cache_statuses(&second, "lint"), vec![CacheStatus::Hit]);
    let cell = cell_workdir(workspace.path(), "lint", 0);
    assert!(cell.join(".cache/pip/wheels.txt").is_file());
    assert!(!workspace.path().join(".cache").exists());
}

/// Sibling cells never leak files into each other's cache entries
#[tokio::test]
async fn test_cells_save_only_their_own_files() {
    let workspace = tempfile::tempdir().unwrap();
    seed_workspace(workspace.path());
    let cache = Arc::new(InMemoryCacheStore::new());

    let yaml = r#"
name: isolated
on: { push: {} }
jobs:
  - id: build
    strategy:
      matrix:
        flavor: [a, b]
    cache:
      purpose: pip
      path: .cache
      manifests: [requirements.txt]
      os: ubuntu
      version: "${{ matrix.flavor }}"
    steps:
      - run: "mk ${{ matrix.flavor }}"
      - run: "settle ${{ matrix.flavor }}"
"#;
    // Cell a is still running when cell b has written its file and saved
    let runner = ScriptedRunner::new()
        .writing("mk a", ".cache/only-a.txt")
        .writing("mk b", ".cache/only-b.txt")
        .delaying("settle a", Duration::from_millis(300));

    let result = run_with_executor(
        workflow_from_yaml(yaml),
        &Event::push("main"),
        cached_executor(runner.clone(), workspace.path(), cache.clone()),
        SchedulingStrategy::Parallel,
    )
    .await
    .unwrap();

    assert_job_status(&result, "build", JobStatus::Success);
    assert_eq!(cache.len().await, 2);

    for flavor in ["a", "b"] {
        let key = CacheKey::derive(
            "pip",
            "ubuntu",
            flavor,
            workspace.path(),
            &["requirements.txt".to_string()],
        )
        .unwrap();
        let entry = cache.get(&key).await.unwrap().unwrap();
        let files: Vec<PathBuf> = entry.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(files, vec![PathBuf::from(format!("only-{}.txt", flavor))], "key {}", key);
    }

    let dirs: HashSet<PathBuf> = runner.seen().into_iter().map(|s| s.working_dir).collect();
    assert_eq!(dirs.len(), 2);
    assert!(!workspace.path().join(".cache").exists());
}
