//! Job domain model

use crate::core::{
    condition::Condition,
    config::{CacheConfig, JobConfig, DEFAULT_TIMEOUT_MINUTES},
    matrix::{MatrixCell, MatrixConfig},
    state::{JobState, JobStatus, SkipReason, UpstreamResults},
    step::Step,
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// A job in a workflow
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Jobs that must succeed before this one runs
    pub needs: Vec<String>,

    /// Run condition (`if:`)
    pub condition: Option<Condition>,

    pub matrix: Option<MatrixConfig>,

    /// Upper bound on concurrently running cells
    pub max_parallel: Option<usize>,

    pub steps: Vec<Step>,

    /// Hard per-cell wall-clock budget
    pub timeout: Duration,

    pub cache: Option<CacheConfig>,

    pub env: BTreeMap<String, String>,

    /// Runtime state
    pub state: JobState,
}

impl Job {
    /// Create a job from a job config
    pub fn from_config(config: &JobConfig, default_timeout_minutes: Option<u64>) -> Result<Self> {
        let condition = config
            .condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .with_context(|| format!("Job '{}' has an invalid condition", config.id))?;

        let minutes = config
            .timeout_minutes
            .or(default_timeout_minutes)
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES);

        Ok(Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            needs: config.needs.clone(),
            condition,
            matrix: config.strategy.as_ref().map(|s| s.matrix.clone()),
            max_parallel: config.strategy.as_ref().and_then(|s| s.max_parallel),
            steps: config
                .steps
                .iter()
                .enumerate()
                .map(|(i, s)| Step::from_config(s, i))
                .collect(),
            timeout: Duration::from_secs(minutes.saturating_mul(60)),
            cache: config.cache.clone(),
            env: config.env.clone(),
            state: JobState::Pending,
        })
    }

    /// Concrete cells to run; a job without a matrix has one empty cell
    pub fn cells(&self) -> Vec<MatrixCell> {
        match &self.matrix {
            Some(matrix) => matrix.expand(),
            None => vec![MatrixCell::default()],
        }
    }

    /// Whether every dependency has reached a terminal state
    pub fn dependencies_terminal(&self, upstream: &UpstreamResults) -> bool {
        self.needs.iter().all(|dep| upstream.contains_key(dep))
    }

    /// First dependency that did not succeed, if any
    pub fn blocked_by(&self, upstream: &UpstreamResults) -> Option<SkipReason> {
        self.needs.iter().find_map(|dep| match upstream.get(dep) {
            Some(JobStatus::Success) => None,
            Some(status) => Some(SkipReason::UpstreamFailure {
                job: dep.clone(),
                status: *status,
            }),
            None => Some(SkipReason::UpstreamFailure {
                job: dep.clone(),
                status: JobStatus::Skipped,
            }),
        })
    }

    /// Whether every dependency succeeded
    pub fn dependencies_satisfied(&self, upstream: &UpstreamResults) -> bool {
        self.blocked_by(upstream).is_none()
    }
}
