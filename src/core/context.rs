//! Run context - variables visible to conditions and `${{ }}` templates

use crate::core::{
    expression::{render, ExpressionScope},
    matrix::MatrixCell,
    trigger::EventContext,
};
use std::collections::{BTreeMap, HashMap};

/// Variables for one evaluation site (a job gate, or a step in a cell)
///
/// Namespaces: `github.*` (event), `env.*`, `matrix.*`, `inputs.*`
/// (the `with:` block of an action step) and `secrets.*`.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub github: HashMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub matrix: MatrixCell,
    pub inputs: BTreeMap<String, String>,

    /// Explicit secrets; anything missing falls back to the process env
    pub secrets: HashMap<String, String>,

    /// Whether every dependency of the job succeeded
    pub upstream_ok: bool,
}

impl RunContext {
    pub fn new(event: &EventContext) -> Self {
        Self {
            github: event.variables(),
            upstream_ok: true,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.extend_env(env);
        self
    }

    pub fn with_matrix(mut self, cell: &MatrixCell) -> Self {
        self.matrix = cell.clone();
        self
    }

    pub fn with_upstream_ok(mut self, ok: bool) -> Self {
        self.upstream_ok = ok;
        self
    }

    pub fn set_secret(&mut self, name: &str, value: &str) {
        self.secrets.insert(name.to_string(), value.to_string());
    }

    /// Layer env values on top, rendering templates against the current scope
    pub fn extend_env(&mut self, env: &BTreeMap<String, String>) {
        for (key, value) in env {
            let rendered = render(value, self);
            self.env.insert(key.clone(), rendered);
        }
    }

    /// Render a template in this scope
    pub fn render(&self, template: &str) -> String {
        render(template, self)
    }
}

impl ExpressionScope for RunContext {
    fn lookup(&self, path: &str) -> Option<String> {
        let (namespace, rest) = path.split_once('.')?;
        match namespace {
            "github" => self.github.get(rest).cloned(),
            "env" => self.env.get(rest).cloned(),
            "matrix" => self.matrix.get(rest).map(str::to_string),
            "inputs" => self.inputs.get(rest).cloned(),
            "secrets" => self
                .secrets
                .get(rest)
                .cloned()
                .or_else(|| std::env::var(rest).ok()),
            _ => None,
        }
    }

    fn upstream_succeeded(&self) -> bool {
        self.upstream_ok
    }
}
