//! Job gating - whether a job may start, and the release gate

use crate::core::{
    preset::{LINT_JOB, UNIT_JOB},
    Job, JobStatus, RunContext, SkipReason, UpstreamResults,
};
use crate::core::trigger::EventContext;

/// Decision for a job whose dependencies have all terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    Skip(SkipReason),
}

/// Decide whether a job runs
///
/// Upstream failure is checked before the job's own condition, so a
/// dependent of a failed job is always reported as skipped for that reason.
pub fn decide(job: &Job, upstream: &UpstreamResults, context: &RunContext) -> GateDecision {
    if let Some(reason) = job.blocked_by(upstream) {
        return GateDecision::Skip(reason);
    }

    match &job.condition {
        Some(condition) if !condition.holds(context) => GateDecision::Skip(SkipReason::ConditionNotMet {
            condition: condition.source.clone(),
        }),
        _ => GateDecision::Run,
    }
}

/// Release gate: a tag push whose lint and unit jobs both succeeded
///
/// The engine gates deploy through the job's `if:` and `needs`; this is
/// the same rule in closed form, reported by `gatekeep run` after a run.
pub fn should_deploy(event: &EventContext, upstream: &UpstreamResults) -> bool {
    let succeeded = |job: &str| upstream.get(job) == Some(&JobStatus::Success);
    event.is_tag_push() && succeeded(LINT_JOB) && succeeded(UNIT_JOB)
}
