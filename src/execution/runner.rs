//! Step runner - executes one resolved step
//!
//! `StepRunner` is the seam between the workflow logic and the outside
//! world. `ShellRunner` spawns real processes; tests substitute a scripted
//! runner.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Error types for step execution
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start command: {0}")]
    Spawn(String),

    #[error("exited with code {0}")]
    NonZeroExit(i32),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("terminated by signal")]
    Signaled,

    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),
}

/// A step with every template rendered, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub name: String,

    /// Shell command; `None` for built-in actions that do nothing locally
    pub command: Option<String>,

    pub env: BTreeMap<String, String>,

    pub working_dir: PathBuf,

    /// Display label of the matrix cell, e.g. `(3.8, ubuntu)`
    pub cell: String,
}

/// Receives step output line by line
pub trait OutputSink: Send + Sync {
    fn on_line(&self, cell: &str, step: &str, line: &str);
}

/// Sink that discards output
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl OutputSink for NoopSink {
    fn on_line(&self, _cell: &str, _step: &str, _line: &str) {}
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run a step to completion; `Ok` means exit code zero
    async fn run(&self, step: &ResolvedStep, sink: &dyn OutputSink) -> Result<(), RunnerError>;
}

/// Runs commands through the platform shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    shell_arg: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        if cfg!(windows) {
            Self::with_shell("cmd", "/C")
        } else {
            Self::with_shell("sh", "-c")
        }
    }

    pub fn with_shell(shell: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            shell_arg: arg.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_lines<R>(reader: Option<R>, step: &ResolvedStep, sink: &dyn OutputSink)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.on_line(&step.cell, &step.name, &line),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read output of '{}': {}", step.name, e);
                break;
            }
        }
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &ResolvedStep, sink: &dyn OutputSink) -> Result<(), RunnerError> {
        let Some(command) = &step.command else {
            return Ok(());
        };
        debug!("Spawning '{}' in {}", step.name, step.working_dir.display());

        // Dropping the child (e.g. on timeout) kills the process
        let mut child = Command::new(&self.shell)
            .arg(&self.shell_arg)
            .arg(command)
            .envs(&step.env)
            .current_dir(&step.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_lines(stdout, step, sink),
            forward_lines(stderr, step, sink),
        );
        let status = status.map_err(|e| RunnerError::Io(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(RunnerError::NonZeroExit(code)),
                None => Err(RunnerError::Signaled),
            }
        }
    }
}
