//! Workflow domain model

use crate::core::{
    config::WorkflowConfig,
    job::Job,
    state::{JobState, RunState, UpstreamResults},
    trigger::{Event, TriggerConfig, TriggerOutcome},
};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A workflow definition plus the state of one run
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,

    pub triggers: TriggerConfig,

    /// Environment shared by every job
    pub env: BTreeMap<String, String>,

    /// `uses:` reference -> shell command template
    pub actions: BTreeMap<String, String>,

    pub jobs: HashMap<String, Job>,

    pub state: RunState,

    /// Job execution order (topological sort)
    execution_order: Vec<String>,
}

impl Workflow {
    /// Create a workflow from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let mut jobs = HashMap::new();
        let mut declared = Vec::new();
        for job_config in &config.jobs {
            let job = Job::from_config(job_config, config.timeout_minutes)?;
            declared.push(job.id.clone());
            jobs.insert(job.id.clone(), job);
        }

        let execution_order = Self::topological_sort(&declared, &jobs);

        Ok(Workflow {
            name: config.name.clone(),
            triggers: config.triggers.clone(),
            env: config.env.clone(),
            actions: config.actions.clone(),
            jobs,
            state: RunState::new(),
            execution_order,
        })
    }

    /// `evaluate_trigger` for this workflow's `on:` rules
    pub fn evaluate_trigger(&self, event: &Event) -> TriggerOutcome {
        self.triggers.evaluate(event)
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Terminal statuses of finished jobs
    pub fn upstream_results(&self) -> UpstreamResults {
        self.jobs
            .values()
            .filter_map(|j| j.state.status().map(|s| (j.id.clone(), s)))
            .collect()
    }

    /// Pending jobs whose dependencies have all terminated, in execution order
    pub fn ready_jobs(&self) -> Vec<&Job> {
        let upstream = self.upstream_results();
        self.execution_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|j| matches!(j.state, JobState::Pending) && j.dependencies_terminal(&upstream))
            .collect()
    }

    pub fn running_jobs(&self) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Running { .. }))
            .collect()
    }

    /// Check if every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.state.is_terminal())
    }

    /// Check if any job failed or timed out
    pub fn has_failed(&self) -> bool {
        self.jobs
            .values()
            .any(|j| j.state.status().is_some_and(|s| s.is_failure()))
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    pub fn update_counts(&mut self) {
        let states = self.jobs.values().map(|j| &j.state);
        self.state.update_counts(states);
    }

    /// Topological order of jobs, ties broken by declaration order
    fn topological_sort(declared: &[String], jobs: &HashMap<String, Job>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for job_id in declared {
            Self::visit(job_id, jobs, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        job_id: &str,
        jobs: &HashMap<String, Job>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = jobs.get(job_id) {
            for dep in &job.needs {
                Self::visit(dep, jobs, visited, result);
            }
        }

        result.push(job_id.to_string());
    }
}
