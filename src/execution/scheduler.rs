//! Execution scheduler - determines which jobs to start next

use crate::core::Workflow;
use std::fmt;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in dependency order, one at a time
    Sequential,

    /// Execute all ready jobs in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Sequential => write!(f, "sequential"),
            SchedulingStrategy::Parallel => write!(f, "parallel"),
            SchedulingStrategy::LimitedParallel(n) => write!(f, "parallel-limited({})", n),
        }
    }
}

/// Scheduler for determining which jobs to run
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of jobs to start
    pub fn next_jobs(&self, workflow: &Workflow) -> Vec<String> {
        match self.strategy {
            SchedulingStrategy::Sequential => self.next_limited(workflow, 1),
            SchedulingStrategy::Parallel => workflow.ready_jobs().iter().map(|j| j.id.clone()).collect(),
            SchedulingStrategy::LimitedParallel(max) => self.next_limited(workflow, max),
        }
    }

    fn next_limited(&self, workflow: &Workflow, max: usize) -> Vec<String> {
        let running_count = workflow.running_jobs().len();
        let remaining = max.saturating_sub(running_count);

        if remaining == 0 {
            return vec![];
        }

        workflow
            .ready_jobs()
            .into_iter()
            .take(remaining)
            .map(|j| j.id.clone())
            .collect()
    }
}
