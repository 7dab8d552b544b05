//! CLI output formatting

use crate::{
    core::{CacheStatus, CellStatus, ExecutionStatus, JobResult, JobStatus, MatrixCell},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "T ");

/// Create a progress bar over jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(progress_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(progress_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::NotTriggered => style("NOT TRIGGERED").dim().to_string(),
    }
}

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Success => style("SUCCESS").green().to_string(),
        JobStatus::Failure => style("FAILURE").red().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
        JobStatus::TimedOut => style("TIMED OUT").red().to_string(),
    }
}

fn cache_badge(cache: CacheStatus) -> String {
    match cache {
        CacheStatus::Disabled => String::new(),
        CacheStatus::Hit => style(" [cache hit]").green().to_string(),
        CacheStatus::Miss => style(" [cache miss]").dim().to_string(),
        CacheStatus::Unavailable => style(" [cache unavailable]").yellow().to_string(),
    }
}

/// Format one job result, with a line per cell for matrix jobs
pub fn format_job_result(result: &JobResult) -> String {
    let icon = match result.status {
        JobStatus::Success => CHECK,
        JobStatus::Failure => CROSS,
        JobStatus::TimedOut => CLOCK,
        JobStatus::Skipped => SKIP,
    };
    let mut out = format!(
        "{} {} {}",
        icon,
        style(&result.job_id).bold(),
        format_job_status(result.status)
    );

    if let Some(reason) = &result.skip_reason {
        out.push_str(&format!(" ({})", style(reason).dim()));
    }

    for cell in &result.cells {
        let label = if cell.cell.is_empty() {
            String::from("-")
        } else {
            cell.cell.to_string()
        };
        let detail = match &cell.status {
            CellStatus::Success => style("ok").green().to_string(),
            CellStatus::Failure { step, error } => {
                format!("{} {}", style(format!("'{}'", step)).red(), style(error).dim())
            }
            CellStatus::TimedOut { after_secs } => {
                style(format!("timed out after {}s", after_secs)).red().to_string()
            }
        };
        out.push_str(&format!(
            "\n    {} {} {}{}",
            style(label).cyan(),
            detail,
            style(format_duration(Duration::from_millis(cell.duration_ms))).dim(),
            cache_badge(cell.cache)
        ));
    }

    out
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::NotTriggered => SKIP,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} - {} {} ({}/{} ok, {} failed, {} skipped)",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.workflow_name).bold(),
        format_status(summary.status),
        summary.event_name,
        style(&summary.git_ref).cyan(),
        summary.succeeded_jobs,
        summary.total_jobs,
        summary.failed_jobs,
        summary.skipped_jobs
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            event,
            total_jobs,
        } => format!(
            "{} Starting {} for {} {} ({} jobs, {})",
            ROCKET,
            style(workflow).bold(),
            event.event_name,
            style(if event.git_ref.is_empty() { "-" } else { event.git_ref.as_str() }).cyan(),
            total_jobs,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::NotTriggered { workflow, event, .. } => format!(
            "{} {} is not triggered by {}",
            SKIP,
            style(workflow).bold(),
            style(event).dim()
        ),
        ExecutionEvent::JobStarted { job_id, cells } => {
            if *cells > 1 {
                format!("{} {} ({} cells)", SPINNER, style(job_id).cyan(), cells)
            } else {
                format!("{} {}", SPINNER, style(job_id).cyan())
            }
        }
        ExecutionEvent::JobFinished { result } => format_job_result(result),
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => format_status(*other),
            };
            format!(
                "{} Run ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// One line per matrix cell
pub fn format_cells(cells: &[MatrixCell]) -> String {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let pairs: Vec<String> = cell
                .values
                .iter()
                .map(|(k, v)| format!("{}={}", style(k).dim(), v))
                .collect();
            format!("  {:>3}. {}", i + 1, pairs.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
