//! CLI output formatting

use crate::{
    core::{ExecutionStatus, Resolution, StageState},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static BLOCK: Emoji<'_, '_> = Emoji("⛔ ", "x ");

/// Create a progress bar over the stages of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Whether the event moves a stage into a terminal state
pub fn finishes_stage(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::StageCompleted { .. }
            | ExecutionEvent::StageSkipped { .. }
            | ExecutionEvent::StageFailed { .. }
            | ExecutionEvent::StageBlocked { .. }
    )
}

/// Format a stage state for display
pub fn format_stage_state(state: &StageState) -> String {
    match state {
        StageState::Pending => style("PENDING").dim().to_string(),
        StageState::Running { .. } => style("RUNNING").yellow().to_string(),
        StageState::Completed { warnings, .. } if !warnings.is_empty() => {
            style("COMPLETED (with warnings)").yellow().to_string()
        }
        StageState::Completed { .. } => style("COMPLETED").green().to_string(),
        StageState::Failed { .. } => style("FAILED").red().to_string(),
        StageState::Skipped { .. } => style("SKIPPED").dim().to_string(),
        StageState::Blocked { .. } => style("BLOCKED").red().to_string(),
        StageState::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a resolution for display
pub fn format_resolution(resolution: &Resolution) -> String {
    format!(
        "{} {} (from {}){}{}",
        INFO,
        style(resolution.version.as_str()).bold(),
        style(resolution.source).dim(),
        if resolution.set_latest { ", latest" } else { "" },
        if resolution.trigger_sibling { ", sibling requested" } else { "" }
    )
}

/// Format run summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} {} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        style(summary.release_version.as_deref().unwrap_or("?")).cyan(),
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
        } => format!(
            "{} Starting release {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::VersionResolved { version, source } => format!(
            "{} Release version {} (from {})",
            INFO,
            style(version).bold(),
            style(source).dim()
        ),
        ExecutionEvent::StageStarted { stage_id } => {
            format!("{} {}", SPINNER, style(stage_id).cyan())
        }
        ExecutionEvent::StageCompleted { stage_id, output } => {
            format!("{} {}: {}", CHECK, style(stage_id).green(), style(output).dim())
        }
        ExecutionEvent::StageWarning { stage_id, warning } => {
            format!("{} {}: {}", WARN, style(stage_id).yellow(), warning)
        }
        ExecutionEvent::StageSkipped { stage_id, reason } => {
            format!("{} {} ({})", SKIP, style(stage_id).dim(), reason)
        }
        ExecutionEvent::StageFailed { stage_id, error } => {
            format!("{} {}: {}", CROSS, style(stage_id).red(), style(error).dim())
        }
        ExecutionEvent::StageBlocked {
            stage_id,
            blocked_by,
        } => format!(
            "{} {} blocked by {}",
            BLOCK,
            style(stage_id).red(),
            style(blocked_by).dim()
        ),
        ExecutionEvent::PipelineCancelled {
            execution_id,
            reason,
        } => format!(
            "{} Run {} cancelled: {}",
            WARN,
            style(short_id(execution_id)).dim(),
            reason
        ),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => format!(
            "{} Run ({}) finished: {}",
            INFO,
            style(short_id(execution_id)).dim(),
            format_status(*status)
        ),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
