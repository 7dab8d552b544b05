//! Workflow configuration from YAML

use crate::core::{
    expression::{check_template, Expr},
    matrix::{scalar_to_string, MatrixConfig},
    trigger::TriggerConfig,
    Workflow,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default per-job timeout when neither job nor workflow sets one
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 10;

/// Longest timeout a job may ask for (one week)
pub const MAX_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

fn check_timeout(minutes: Option<u64>, owner: &str) -> Result<()> {
    match minutes {
        Some(0) => anyhow::bail!("{} has a zero timeout", owner),
        Some(m) if m > MAX_TIMEOUT_MINUTES => anyhow::bail!(
            "{} has a timeout of {} minutes, above the limit of {}",
            owner,
            m,
            MAX_TIMEOUT_MINUTES
        ),
        _ => Ok(()),
    }
}

/// Accept any scalar (`FORCE_COLOR: 1`) as a string value
fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match scalar_to_string(&value) {
            Some(s) => Ok((key, s)),
            None => Err(serde::de::Error::custom(format!(
                "value for '{}' must be a scalar",
                key
            ))),
        })
        .collect()
}

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Trigger rules
    #[serde(rename = "on")]
    pub triggers: TriggerConfig,

    /// Environment shared by every job
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// Maps `uses:` references to shell command templates
    #[serde(default)]
    pub actions: BTreeMap<String, String>,

    /// Default timeout for jobs (in minutes)
    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    /// Workflow jobs
    pub jobs: Vec<JobConfig>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must succeed first
    #[serde(default)]
    pub needs: Vec<String>,

    /// Run condition expression
    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    /// Wall-clock budget per matrix cell
    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    pub matrix: MatrixConfig,

    /// Upper bound on concurrently running cells
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Dependency cache declaration for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// First component of the key, e.g. `pip`
    pub purpose: String,

    /// Directory restored before and saved after the steps
    pub path: String,

    /// Files whose contents are hashed into the key
    #[serde(default)]
    pub manifests: Vec<String>,

    /// OS part of the key; defaults to `${{ matrix.os }}`, then the host OS
    #[serde(default)]
    pub os: Option<String>,

    /// Interpreter part of the key; defaults to `${{ matrix.python-version }}`
    #[serde(default)]
    pub version: Option<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Inline shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Action reference
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,

    /// A failure of this step does not fail the cell
    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default)]
    pub working_directory: Option<String>,
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        self.triggers.validate()?;
        check_timeout(self.timeout_minutes, &format!("Workflow '{}'", self.name))?;

        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if !seen_ids.insert(&job.id) {
                anyhow::bail!("Duplicate job ID: {}", job.id);
            }
        }

        for job in &self.jobs {
            for dep in &job.needs {
                if !seen_ids.contains(dep) {
                    anyhow::bail!("Job '{}' needs non-existent job '{}'", job.id, dep);
                }
            }

            if let Some(condition) = &job.condition {
                Expr::parse(condition)
                    .with_context(|| format!("Job '{}' has an invalid condition", job.id))?;
            }

            check_timeout(job.timeout_minutes, &format!("Job '{}'", job.id))?;

            if let Some(strategy) = &job.strategy {
                strategy
                    .matrix
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Job '{}': {}", job.id, e))?;
                if strategy.max_parallel == Some(0) {
                    anyhow::bail!("Job '{}' has max-parallel of 0", job.id);
                }
            }

            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job.id);
            }

            for (index, step) in job.steps.iter().enumerate() {
                let label = step.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
                match (&step.run, &step.uses) {
                    (Some(_), Some(_)) => anyhow::bail!(
                        "Step '{}' in job '{}' sets both 'run' and 'uses'",
                        label,
                        job.id
                    ),
                    (None, None) => anyhow::bail!(
                        "Step '{}' in job '{}' needs either 'run' or 'uses'",
                        label,
                        job.id
                    ),
                    _ => {}
                }
                let templates = step
                    .run
                    .iter()
                    .chain(step.with.values())
                    .chain(step.env.values());
                for template in templates {
                    check_template(template).with_context(|| {
                        format!("Step '{}' in job '{}' has an invalid expression", label, job.id)
                    })?;
                }
            }
        }

        for template in self.actions.values() {
            check_template(template).context("Invalid expression in actions table")?;
        }

        self.check_cycles()?;

        Ok(())
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.id) {
                self.dfs_check(&job.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.job(job_id) {
            for dep in &job.needs {
                if recursion_stack.contains(dep) {
                    anyhow::bail!("Cycle detected in job graph involving '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow> {
        Workflow::from_config(self)
    }
}
