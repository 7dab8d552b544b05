//! Bundled reference workflow: lint, unit matrix and tag-gated deploy

use crate::core::config::WorkflowConfig;
use anyhow::Result;

/// Job ids of the bundled workflow
pub const LINT_JOB: &str = "lint";
pub const UNIT_JOB: &str = "unit";
pub const DEPLOY_JOB: &str = "deploy";

pub const PYTHON_PACKAGE_YAML: &str = include_str!("../../workflows/python-package.yml");

/// Parse the bundled Python package workflow
pub fn python_package() -> Result<WorkflowConfig> {
    WorkflowConfig::from_yaml(PYTHON_PACKAGE_YAML)
}
