//! Workflow execution engine

pub mod engine;
pub mod executor;
pub mod gate;
pub mod runner;
pub mod scheduler;
pub mod workdir;

pub use engine::{EngineError, ExecutionEngine, ExecutionEvent, RunReport};
pub use executor::JobExecutor;
pub use gate::{should_deploy, GateDecision};
pub use runner::{NoopSink, OutputSink, ResolvedStep, RunnerError, ShellRunner, StepRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
pub use workdir::cell_workdir;
