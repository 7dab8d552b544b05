//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::matrix::MatrixCell;

/// Overall workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every required job succeeded (or was skipped by its condition)
    Completed,
    /// At least one job failed or timed out
    Failed,
    /// The event matched no trigger; no jobs ran
    NotTriggered,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::NotTriggered => "NotTriggered",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ExecutionStatus::Pending),
            "Running" => Ok(ExecutionStatus::Running),
            "Completed" => Ok(ExecutionStatus::Completed),
            "Failed" => Ok(ExecutionStatus::Failed),
            "NotTriggered" => Ok(ExecutionStatus::NotTriggered),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Terminal status of a job, as seen by its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
    Skipped,
    TimedOut,
}

impl JobStatus {
    /// Whether this status fails the run
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failure | JobStatus::TimedOut)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Skipped => "skipped",
            JobStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Results of already-finished jobs, keyed by job id
pub type UpstreamResults = HashMap<String, JobStatus>;

/// Failure taxonomy for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step exited non-zero (or could not be started)
    StepFailure,
    /// The wall-clock budget of a job was exceeded
    Timeout,
    /// A dependency did not succeed, so the job never ran
    SkippedDueToUpstreamFailure,
    /// The trigger or job condition did not hold; a normal no-op
    ConditionNotMet,
}

/// Why a job was skipped instead of run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailure { job: String, status: JobStatus },
    ConditionNotMet { condition: String },
}

impl SkipReason {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SkipReason::UpstreamFailure { .. } => FailureKind::SkippedDueToUpstreamFailure,
            SkipReason::ConditionNotMet { .. } => FailureKind::ConditionNotMet,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailure { job, status } => {
                write!(f, "dependency '{}' ended with {}", job, status)
            }
            SkipReason::ConditionNotMet { condition } => {
                write!(f, "condition not met: {}", condition)
            }
        }
    }
}

/// Outcome of one step inside a matrix cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    /// Failed, but the step is marked continue-on-error
    FailedIgnored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// How a cell interacted with the cache store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Job declares no cache, or no store is configured
    Disabled,
    /// Entry restored before the steps ran
    Hit,
    /// Nothing stored under the key; written back after success
    Miss,
    /// Store or key derivation failed; treated as a miss, never saved
    Unavailable,
}

/// Terminal status of a single matrix cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellStatus {
    Success,
    Failure { step: String, error: String },
    TimedOut { after_secs: u64 },
}

impl CellStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CellStatus::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CellStatus::Success => None,
            CellStatus::Failure { .. } => Some(FailureKind::StepFailure),
            CellStatus::TimedOut { .. } => Some(FailureKind::Timeout),
        }
    }
}

/// Per-cell result, reported alongside the collapsed job status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellResult {
    pub cell: MatrixCell,
    pub status: CellStatus,
    pub steps: Vec<StepRecord>,
    pub cache: CacheStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub duration_ms: u64,
}

/// Result of `run_job`
///
/// `status` is the collapsed, authoritative outcome used for gating
/// dependents; `cells` keeps every matrix cell's own result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub cells: Vec<CellResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// A job that never ran
    pub fn skipped(job_id: &str, reason: SkipReason) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Skipped,
            cells: Vec::new(),
            skip_reason: Some(reason),
            error: None,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            JobStatus::Success => None,
            JobStatus::Failure => Some(FailureKind::StepFailure),
            JobStatus::TimedOut => Some(FailureKind::Timeout),
            JobStatus::Skipped => self.skip_reason.as_ref().map(SkipReason::failure_kind),
        }
    }
}

/// State of a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for dependencies
    Pending,
    /// Cells are executing
    Running {
        started_at: DateTime<Utc>,
    },
    /// Every cell succeeded
    Success {
        cells: Vec<CellResult>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// At least one cell failed
    Failure {
        error: String,
        cells: Vec<CellResult>,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Every unsuccessful cell ran out of time
    TimedOut {
        cells: Vec<CellResult>,
        started_at: DateTime<Utc>,
        timed_out_at: DateTime<Utc>,
    },
    /// Job never ran
    Skipped {
        reason: SkipReason,
    },
}

impl JobState {
    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running { .. })
    }

    /// Terminal status, if any
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            JobState::Pending | JobState::Running { .. } => None,
            JobState::Success { .. } => Some(JobStatus::Success),
            JobState::Failure { .. } => Some(JobStatus::Failure),
            JobState::TimedOut { .. } => Some(JobStatus::TimedOut),
            JobState::Skipped { .. } => Some(JobStatus::Skipped),
        }
    }

    /// Build the terminal state matching a job result
    pub fn from_result(result: &JobResult) -> Self {
        let started_at = result.started_at.unwrap_or(result.finished_at);
        match result.status {
            JobStatus::Success => JobState::Success {
                cells: result.cells.clone(),
                started_at,
                completed_at: result.finished_at,
            },
            JobStatus::Failure => JobState::Failure {
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
                cells: result.cells.clone(),
                started_at,
                failed_at: result.finished_at,
            },
            JobStatus::TimedOut => JobState::TimedOut {
                cells: result.cells.clone(),
                started_at,
                timed_out_at: result.finished_at,
            },
            JobStatus::Skipped => JobState::Skipped {
                reason: result.skip_reason.clone().unwrap_or(SkipReason::ConditionNotMet {
                    condition: String::new(),
                }),
            },
        }
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
    pub running_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
            running_jobs: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// The event matched no trigger
    pub fn not_triggered(&mut self) {
        let now = Utc::now();
        self.status = ExecutionStatus::NotTriggered;
        self.started_at = Some(now);
        self.completed_at = Some(now);
    }

    /// Recompute job counters from job states
    pub fn update_counts<'a>(&mut self, states: impl Iterator<Item = &'a JobState>) {
        let (mut total, mut ok, mut failed, mut skipped, mut running) = (0, 0, 0, 0, 0);
        for state in states {
            total += 1;
            match state {
                JobState::Success { .. } => ok += 1,
                JobState::Failure { .. } | JobState::TimedOut { .. } => failed += 1,
                JobState::Skipped { .. } => skipped += 1,
                JobState::Running { .. } => running += 1,
                JobState::Pending => {}
            }
        }
        self.total_jobs = total;
        self.succeeded_jobs = ok;
        self.failed_jobs = failed;
        self.skipped_jobs = skipped;
        self.running_jobs = running;
    }

    /// Fraction of jobs in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.skipped_jobs) as f64 / self.total_jobs as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
