//! gatekeep - a data-driven CI workflow runner
//!
//! Workflows declare triggers, jobs gated on each other, build matrices and
//! a keyed dependency cache. Steps run through the `StepRunner` seam.

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStore, FsCacheStore, InMemoryCacheStore};
pub use core::{
    Event, EventContext, ExecutionStatus, Job, JobResult, JobStatus, MatrixCell, TriggerOutcome,
    Workflow,
};
pub use execution::{
    should_deploy, ExecutionEngine, ExecutionEvent, JobExecutor, RunReport, SchedulingStrategy,
    ShellRunner, StepRunner,
};
