use anyhow::{Context, Result};
use blinko_release::{
    capability::{Capabilities, CapabilityConfig, MemoryCapabilities},
    cli::{
        commands::{BumpCommand, HistoryCommand, ListCommand, ResolveCommand, RunCommand, ValidateCommand},
        output::*,
        Cli, Command,
    },
    core::{config::PipelineConfig, ExecutionStatus, Pipeline, StageKind, StageState},
    execution::{ExecutionEngine, ExecutionResult, GroupFiles, StageExecutor},
    persistence::{create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli.config).await?,
        Command::Resolve(cmd) => resolve_version(cmd, &cli.config)?,
        Command::Bump(cmd) => bump_version(cmd, &cli.config).await?,
        Command::Validate(cmd) => validate_pipeline(cmd, &cli.config)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_pipeline(config_path: &str) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(config_path).context("Failed to load pipeline config")?;
    Ok(config.to_pipeline())
}

fn capabilities(root: &Path, repository: Option<&String>, dry_run: bool) -> Capabilities {
    if dry_run {
        return MemoryCapabilities::new().capabilities();
    }
    let mut config = CapabilityConfig::new(root);
    if let Some(repository) = repository {
        config = config.with_repository(repository.clone());
    }
    Capabilities::system(&config)
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = blinko_release::persistence::SqliteExecutionStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, config_path: &str) -> Result<()> {
    let mut pipeline = load_pipeline(config_path)?;
    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let trigger = cmd.trigger.to_trigger()?;

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history || cmd.dry_run {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    if cmd.dry_run {
        println!("{} Dry run: nothing will be committed, pushed or published", WARN);
    }
    let executor = StageExecutor::new(
        capabilities(&cmd.root, cmd.repository.as_ref(), cmd.dry_run),
        cmd.root.clone(),
    )
    .dry_run(cmd.dry_run);
    let mut engine = ExecutionEngine::new(executor, cmd.strategy.to_strategy(cmd.max_parallel));
    // Dry runs never supersede real ones
    if !cmd.dry_run {
        engine = engine.with_group_files(GroupFiles::new(GroupFiles::default_dir()));
    }

    let progress = create_progress_bar(pipeline.stages.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        if finishes_stage(&event) {
            bar.inc(1);
        }
    });

    println!();
    let result = engine.execute(&mut pipeline, trigger).await;
    progress.finish_and_clear();

    if let Err(e) = result {
        error!("{}", e);
        println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
        std::process::exit(1);
    }

    if !cmd.no_history && !cmd.dry_run {
        let summary = create_summary(&pipeline);
        store.save_execution(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    print_stage_table(&pipeline);

    match pipeline.state.status {
        ExecutionStatus::Completed => println!(
            "\n{} {} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style(release_label(&pipeline)).cyan(),
            style("successfully").green()
        ),
        ExecutionStatus::Cancelled => println!(
            "\n{} {} {} was superseded by a newer run",
            WARN,
            style(&pipeline.name).bold(),
            style(release_label(&pipeline)).cyan()
        ),
        status => {
            println!(
                "\n{} {} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                style(release_label(&pipeline)).cyan(),
                format_status(status)
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

fn release_label(pipeline: &Pipeline) -> String {
    pipeline
        .resolution()
        .map(|r| r.version.tag())
        .unwrap_or_default()
}

fn print_stage_table(pipeline: &Pipeline) {
    println!();
    for stage_id in pipeline.execution_order() {
        if let Some(stage) = pipeline.stage(stage_id) {
            let detail = match &stage.state {
                StageState::Failed { error, .. } => format!(" {}", style(error).dim()),
                StageState::Blocked { reason } | StageState::Skipped { reason } => {
                    format!(" {}", style(reason).dim())
                }
                StageState::Completed { warnings, .. } if !warnings.is_empty() => {
                    format!(" {}", style(warnings.join("; ")).dim())
                }
                _ => String::new(),
            };
            println!(
                "  {:<20} {}{}",
                style(stage_id).bold(),
                format_stage_state(&stage.state),
                detail
            );
        }
    }
}

fn resolve_version(cmd: &ResolveCommand, config_path: &str) -> Result<()> {
    let mut pipeline = load_pipeline(config_path)?;
    let resolution = pipeline.bind_release(cmd.trigger.to_trigger()?)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(resolution.as_ref())?);
    } else {
        println!("{}", format_resolution(&resolution));
        println!("version={}", resolution.version);
        println!("tag={}", resolution.version.tag());
        println!("latest={}", resolution.set_latest);
    }
    Ok(())
}

async fn bump_version(cmd: &BumpCommand, config_path: &str) -> Result<()> {
    let mut pipeline = load_pipeline(config_path)?;
    let resolution = pipeline.bind_release(cmd.trigger.to_trigger()?)?;
    println!("{}", format_resolution(&resolution));

    let executor = StageExecutor::new(capabilities(&cmd.root, None, cmd.dry_run), cmd.root.clone())
        .dry_run(cmd.dry_run);

    let stage_ids: Vec<String> = pipeline
        .execution_order()
        .iter()
        .filter(|id| {
            pipeline
                .stage(id)
                .is_some_and(|s| matches!(s.kind, StageKind::Propagate { .. }))
        })
        .cloned()
        .collect();

    if stage_ids.is_empty() {
        println!("{} Pipeline has no propagate stage", WARN);
        return Ok(());
    }

    for stage_id in &stage_ids {
        let (Some(stage), Some(context)) = (
            pipeline.stage(stage_id),
            pipeline.create_context_for_stage(stage_id),
        ) else {
            continue;
        };

        match executor.execute(stage, &context).await {
            ExecutionResult::Failed { error } => {
                println!("{} {}: {}", CROSS, style(stage_id).red(), style(error).dim());
                std::process::exit(1);
            }
            ExecutionResult::Success { output }
            | ExecutionResult::SuccessWithWarning { output, .. } => {
                println!("{} {}: {}", CHECK, style(stage_id).green(), output);
            }
            ExecutionResult::Skipped { reason } => {
                println!("{} {} ({})", SKIP, style(stage_id).dim(), reason);
            }
        }
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand, config_path: &str) -> Result<()> {
    println!("{} Validating {}...", INFO, config_path);

    match PipelineConfig::from_file(config_path) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Product: {}", style(config.product_name()).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());

            let pipeline = config.to_pipeline();
            println!("  Order: {}", style(pipeline.execution_order().join(" → ")).dim());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;
        json_data.push(serde_json::json!({
            "name": pipeline_name,
            "execution_count": executions.len(),
        }));

        if cmd.with_counts {
            let completed = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Completed)
                .count();
            let failed = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_executions(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    if let Some(version) = &summary.release_version {
        println!("  Version: {}", style(version).bold());
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} done, {} failed, {} blocked of {}",
        style(summary.completed_stages).green(),
        style(summary.failed_stages).red(),
        style(summary.blocked_stages).yellow(),
        summary.total_stages
    );

    Ok(())
}
