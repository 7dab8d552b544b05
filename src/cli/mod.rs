//! Command-line interface

pub mod commands;
pub mod output;
pub mod terminal_output;

use clap::{Parser, Subcommand};
use commands::{
    CacheKeyCommand, HistoryCommand, ListCommand, MatrixCommand, RunCommand, ValidateCommand,
};
use std::ffi::OsString;

/// Data-driven CI workflow runner
#[derive(Debug, Parser, Clone)]
#[command(name = "gatekeep")]
#[command(version = "0.1.0")]
#[command(about = "Runs CI workflows locally: triggers, gated jobs, matrices and a dependency cache", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Stream step output to the terminal
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a workflow for an event
    Run(RunCommand),

    /// Validate a workflow configuration
    Validate(ValidateCommand),

    /// Print the expanded matrix of a job
    Matrix(MatrixCommand),

    /// Compute the cache key of a job cell
    CacheKey(CacheKeyCommand),

    /// List workflows with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
