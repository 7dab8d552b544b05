//! Step domain model

use crate::core::config::StepConfig;
use std::collections::BTreeMap;

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Inline shell command
    Run(String),
    /// Action reference, e.g. `actions/checkout@v2`
    Uses(String),
}

/// A single step in a job
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    pub with: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub continue_on_error: bool,
    pub working_directory: Option<String>,
}

impl Step {
    /// Create a step from a step config; `index` names unnamed steps
    pub fn from_config(config: &StepConfig, index: usize) -> Self {
        let action = match (&config.run, &config.uses) {
            (Some(run), _) => StepAction::Run(run.clone()),
            (None, Some(uses)) => StepAction::Uses(uses.clone()),
            (None, None) => StepAction::Run(String::new()),
        };

        let name = config.name.clone().unwrap_or_else(|| match &action {
            StepAction::Run(cmd) => {
                let first = cmd.lines().next().unwrap_or("").trim();
                if first.is_empty() {
                    format!("step {}", index + 1)
                } else {
                    format!("Run {}", first)
                }
            }
            StepAction::Uses(reference) => format!("Uses {}", reference),
        });

        Step {
            name,
            action,
            with: config.with.clone(),
            env: config.env.clone(),
            continue_on_error: config.continue_on_error,
            working_directory: config.working_directory.clone(),
        }
    }

    /// Action reference without its `@version` suffix
    pub fn action_name(&self) -> Option<&str> {
        match &self.action {
            StepAction::Uses(reference) => {
                Some(reference.split('@').next().unwrap_or(reference.as_str()))
            }
            StepAction::Run(_) => None,
        }
    }
}
