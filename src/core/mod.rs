//! Core domain models for workflows
//!
//! This module defines the workflow configuration, the trigger and
//! condition languages, build matrices, and the job/run state machines.

pub mod condition;
pub mod config;
pub mod context;
pub mod expression;
pub mod job;
pub mod matrix;
pub mod preset;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use job::*;
pub use matrix::{MatrixCell, MatrixConfig};
pub use state::*;
pub use step::*;
pub use trigger::{Event, EventContext, EventKind, GitRef, TriggerOutcome};
pub use workflow::*;
