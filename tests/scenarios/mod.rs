//! Scenario-based tests for gatekeep

mod cache_behavior;
mod continue_on_error;
mod failure_propagation;
mod matrix_expansion;
mod scheduling;
mod timeouts;
mod trigger_gating;
