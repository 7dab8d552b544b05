use anyhow::{bail, Context, Result};
use gatekeep::cache::{CacheKey, CacheStore, FsCacheStore};
use gatekeep::cli::commands::{
    CacheKeyCommand, HistoryCommand, ListCommand, MatrixCommand, RunCommand, ValidateCommand,
};
use gatekeep::cli::output::*;
use gatekeep::cli::terminal_output::TerminalOutputSink;
use gatekeep::cli::{Cli, Command};
use gatekeep::core::config::WorkflowConfig;
use gatekeep::core::{preset, EventContext, ExecutionStatus, MatrixCell, RunContext};
use gatekeep::execution::{ExecutionEngine, ExecutionEvent, JobExecutor, ShellRunner};
use gatekeep::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Matrix(cmd) => show_matrix(cmd)?,
        Command::CacheKey(cmd) => show_cache_key(cmd)?,
        Command::List(cmd) => list_workflows(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Workflow from `--file`, or the bundled python-package workflow
fn load_config(file: &Option<PathBuf>) -> Result<WorkflowConfig> {
    match file {
        Some(path) => WorkflowConfig::from_file(path)
            .with_context(|| format!("Failed to load workflow {}", path.display())),
        None => preset::python_package(),
    }
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = gatekeep::persistence::store::SqliteRunStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without sqlite; run history is not kept");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_workflow(cmd: &RunCommand, stream: bool) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let mut workflow = config.to_workflow()?;
    let event = cmd.to_event();

    if !cmd.json {
        println!("{} Loaded workflow: {}", INFO, style(&workflow.name).bold());
    }

    let mut executor = JobExecutor::new(ShellRunner::new(), cmd.workspace.clone());
    if !cmd.no_cache {
        let store = match &cmd.cache_dir {
            Some(dir) => Some(FsCacheStore::new(dir.clone())),
            None => FsCacheStore::default_location(),
        };
        match store {
            Some(store) => {
                let store: Arc<dyn CacheStore> = Arc::new(store);
                executor = executor.with_cache(store);
            }
            None => warn!("No local data directory; running without a cache"),
        }
    }
    if stream {
        executor = executor.with_sink(Arc::new(TerminalOutputSink::new()));
    }
    if !cmd.secret.is_empty() {
        let secrets: HashMap<String, String> = cmd.secret.iter().cloned().collect();
        executor = executor.with_secrets(secrets);
    }

    let history: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let engine = ExecutionEngine::new(executor, cmd.scheduling_strategy());

    if !cmd.json {
        let progress = create_progress_bar(workflow.jobs.len());
        let quiet = stream;
        engine
            .add_event_handler(move |event| {
                if let ExecutionEvent::JobFinished { .. } = &event {
                    progress.inc(1);
                }
                let line = format_execution_event(&event);
                if quiet {
                    println!("{}", line);
                } else {
                    progress.println(line);
                }
                if let ExecutionEvent::RunCompleted { .. } | ExecutionEvent::NotTriggered { .. } = &event {
                    progress.finish_and_clear();
                }
            })
            .await;
    }

    let result = engine.execute(&mut workflow, &event).await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            println!("\n{} {} {}", CROSS, style(&workflow.name).bold(), style("failed").red());
            std::process::exit(1);
        }
    };

    if report.status != ExecutionStatus::NotTriggered {
        let summary = create_summary(&workflow, &report);
        history.save_run(&summary).await?;
        if !cmd.no_history && !cmd.json {
            println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            );
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match report.status {
            ExecutionStatus::Completed => println!(
                "\n{} {} completed {}",
                CHECK,
                style(&workflow.name).bold(),
                style("successfully").green()
            ),
            ExecutionStatus::NotTriggered => println!(
                "\n{} {} not triggered by {}",
                SKIP,
                style(&workflow.name).bold(),
                event
            ),
            _ => println!("\n{} {} {}", CROSS, style(&workflow.name).bold(), style("failed").red()),
        }
        match report.release_gate() {
            Some(true) => println!("{} Release gate open", CHECK),
            Some(false) => println!("{} Release gate closed", SKIP),
            None => {}
        }
    }

    if !report.succeeded() {
        std::process::exit(1);
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    let (config, workflow) = match load_config(&cmd.file).and_then(|c| c.to_workflow().map(|w| (c, w))) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    if cmd.json {
        let data = serde_json::json!({
            "valid": true,
            "name": config.name,
            "execution_order": workflow.execution_order(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Workflow configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Jobs: {}", style(config.jobs.len()).cyan());
    for id in workflow.execution_order() {
        let Some(job) = workflow.job(id) else {
            continue;
        };
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", job.needs.join(", "))
        };
        println!(
            "    {} {} cell(s), {} step(s){}",
            style(id).cyan(),
            job.cells().len(),
            job.steps.len(),
            style(needs).dim()
        );
    }

    Ok(())
}

fn show_matrix(cmd: &MatrixCommand) -> Result<()> {
    let workflow = load_config(&cmd.file)?.to_workflow()?;
    let Some(job) = workflow.job(&cmd.job) else {
        bail!("Unknown job '{}'", cmd.job);
    };
    let cells = job.cells();

    if cmd.json {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = cells
            .iter()
            .map(|cell| {
                cell.values
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect()
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{} {} cell(s) for {}", INFO, cells.len(), style(&job.id).bold());
        println!("{}", format_cells(&cells));
    }

    Ok(())
}

fn show_cache_key(cmd: &CacheKeyCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let Some(job) = config.job(&cmd.job) else {
        bail!("Unknown job '{}'", cmd.job);
    };
    let Some(cache) = &job.cache else {
        bail!("Job '{}' declares no cache", cmd.job);
    };

    let context = RunContext::new(&EventContext::default())
        .with_matrix(&MatrixCell::from_pairs(&cmd.cell))
        .with_env(&config.env)
        .with_env(&job.env);
    let key = CacheKey::for_cell(cache, &context, &cmd.workspace)?;

    println!("{}", key);
    Ok(())
}

async fn list_workflows(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let workflows = store.list_workflows().await?;

    if cmd.json {
        let mut rows = Vec::new();
        for name in &workflows {
            rows.push(serde_json::json!({
                "name": name,
                "run_count": store.count_runs(name).await?,
            }));
        }
        let data = serde_json::json!({ "workflows": rows });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(());
    }

    println!("{} Workflows in history:", INFO);
    for name in &workflows {
        if cmd.with_counts {
            let runs = store.list_runs(name, usize::MAX).await?;
            let completed = runs.iter().filter(|r| r.status == ExecutionStatus::Completed).count();
            let failed = runs.iter().filter(|r| r.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(name).bold(),
                style(runs.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.workflow {
        Some(name) => store.list_runs(name, cmd.limit).await?,
        None => store.recent_runs(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Event: {} {}", summary.event_name, style(&summary.git_ref).cyan());
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} total, {} succeeded, {} failed, {} skipped",
        summary.total_jobs, summary.succeeded_jobs, summary.failed_jobs, summary.skipped_jobs
    );
}
