//! CLI command definitions

use crate::core::trigger::Event;
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run a workflow for one event
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file (defaults to the built-in Python package workflow)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Event kind
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Pushed ref, or the target branch of a pull request
    #[arg(long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Commit sha, exposed as `github.sha`
    #[arg(long)]
    pub sha: Option<String>,

    /// Cron expression of the schedule that fired
    #[arg(long)]
    pub cron: Option<String>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrent job limit for `parallel-limited`
    #[arg(long, default_value_t = 2)]
    pub max_jobs: usize,

    /// Directory holding the dependency cache
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Run without the dependency cache
    #[arg(long)]
    pub no_cache: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Directory the steps run in
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Secret values (NAME=value); unset secrets fall back to the environment
    #[arg(long, value_parser = parse_key_value)]
    pub secret: Vec<(String, String)>,
}

impl RunCommand {
    pub fn to_event(&self) -> Event {
        let event = match self.event {
            EventArg::Push => Event::push(&self.git_ref),
            EventArg::PullRequest => Event::pull_request(&self.git_ref),
            EventArg::Schedule => Event::schedule(self.cron.as_deref()),
        };
        match &self.sha {
            Some(sha) => event.with_sha(sha.clone()),
            None => event,
        }
    }

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_jobs.max(1))
            }
        }
    }
}

/// Validate a workflow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the expanded matrix of a job
#[derive(Debug, Args, Clone)]
pub struct MatrixCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Job id
    #[arg(long)]
    pub job: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Compute the cache key of a job cell
#[derive(Debug, Args, Clone)]
pub struct CacheKeyCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Job id
    #[arg(long)]
    pub job: String,

    /// Matrix values (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub cell: Vec<(String, String)>,

    /// Directory manifests are read from
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,
}

/// List workflows with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Push,
    #[value(name = "pull_request", alias = "pull-request")]
    PullRequest,
    Schedule,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[value(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
