//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{AlreadyBound, ExecutionStatus, Pipeline, StageState, TriggerContext, VersionSource},
    execution::{
        concurrency::{ConcurrencyGroups, GroupFiles},
        ExecutionResult, ExecutionScheduler, SchedulingStrategy, StageExecutor,
    },
};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    VersionResolved {
        version: String,
        source: VersionSource,
    },
    StageStarted {
        stage_id: String,
    },
    StageCompleted {
        stage_id: String,
        output: String,
    },
    StageWarning {
        stage_id: String,
        warning: String,
    },
    StageSkipped {
        stage_id: String,
        reason: String,
    },
    StageFailed {
        stage_id: String,
        error: String,
    },
    StageBlocked {
        stage_id: String,
        blocked_by: String,
    },
    PipelineCancelled {
        execution_id: Uuid,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    AlreadyBound(#[from] AlreadyBound),

    #[error("Stage {0} not found")]
    UnknownStage(String),

    #[error("Concurrency group unavailable: {0}")]
    ConcurrencyGroup(#[from] std::io::Error),
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    executor: Arc<StageExecutor>,
    strategy: SchedulingStrategy,
    groups: Arc<ConcurrencyGroups>,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl ExecutionEngine {
    pub fn new(executor: StageExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(executor),
            strategy,
            groups: ConcurrencyGroups::new(),
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    /// Share concurrency groups with other engines in the process
    pub fn with_groups(mut self, groups: Arc<ConcurrencyGroups>) -> Self {
        self.groups = groups;
        self
    }

    /// Share concurrency groups with every invocation using `files`
    pub fn with_group_files(self, files: GroupFiles) -> Self {
        self.with_groups(ConcurrencyGroups::shared(files))
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline for one trigger.
    ///
    /// Stage failures end the run with `ExecutionStatus::Failed` in the
    /// pipeline state; only engine-level problems are returned as errors.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        trigger: TriggerContext,
    ) -> Result<(), EngineError> {
        let execution_id = pipeline.state.execution_id;
        let pipeline_name = pipeline.name.clone();

        info!("Starting pipeline execution: {} ({})", pipeline_name, execution_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline_name.clone(),
        });

        // Root binding: every stage sees this one resolution
        let resolution = pipeline.bind_release(trigger)?;
        info!(
            "Release version {} (from {})",
            resolution.version, resolution.source
        );
        self.emit_event(ExecutionEvent::VersionResolved {
            version: resolution.version.to_string(),
            source: resolution.source,
        });

        let key = pipeline
            .concurrency_key()
            .unwrap_or_else(|| format!("{}-{}", pipeline_name, resolution.version));
        let (guard, superseded) = self
            .groups
            .register(&key, execution_id, pipeline.concurrency.cancel_in_progress)
            .await?;
        if let Some(previous) = superseded {
            info!("Superseded run {} in group '{}'", previous, key);
        }
        let mut cancellation = guard.cancellation();

        pipeline.state.start(pipeline.stages.len());

        let mut scheduler = ExecutionScheduler::new(self.strategy);
        scheduler.prepare(pipeline);

        let mut tasks: JoinSet<(String, Result<ExecutionResult, String>)> = JoinSet::new();
        let mut stage_handles: Vec<AbortHandle> = Vec::new();
        let mut cancelled = false;
        let mut cancel_open = true;

        loop {
            for stage_id in scheduler.next_stages() {
                let stage = pipeline
                    .stage(&stage_id)
                    .cloned()
                    .ok_or_else(|| EngineError::UnknownStage(stage_id.clone()))?;
                let context = pipeline
                    .create_context_for_stage(&stage_id)
                    .ok_or_else(|| EngineError::UnknownStage(stage_id.clone()))?;

                if let Some(s) = pipeline.stage_mut(&stage_id) {
                    s.state = StageState::Running {
                        started_at: chrono::Utc::now(),
                    };
                }
                self.emit_event(ExecutionEvent::StageStarted {
                    stage_id: stage_id.clone(),
                });

                // The stage runs on its own task so a panic surfaces as a
                // join error tied to the stage id
                let executor = self.executor.clone();
                let handle = tokio::spawn(async move { executor.execute(&stage, &context).await });
                stage_handles.push(handle.abort_handle());
                tasks.spawn(async move {
                    let result = handle.await.map_err(|e| format!("stage task ended abnormally: {}", e));
                    (stage_id, result)
                });
            }

            if tasks.is_empty() && !scheduler.has_more() {
                break;
            }

            tokio::select! {
                changed = cancellation.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancellation.borrow() => {
                            cancelled = true;
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok((stage_id, result))) => {
                            let result = result.unwrap_or_else(|error| ExecutionResult::Failed { error });
                            self.apply_result(pipeline, &mut scheduler, &stage_id, result);
                        }
                        Some(Err(join_error)) => {
                            error!("Stage supervisor task failed: {}", join_error);
                        }
                        None => {
                            if !scheduler.has_more() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if cancelled {
            warn!("Run {} superseded by a newer run in group '{}'", execution_id, key);
            for handle in &stage_handles {
                handle.abort();
            }
            tasks.abort_all();
            scheduler.abandon();

            for stage in pipeline.stages.values_mut() {
                if matches!(stage.state, StageState::Pending | StageState::Running { .. }) {
                    stage.state = StageState::Cancelled;
                }
            }
            self.update_state_counts(pipeline);
            pipeline.state.cancel();

            self.emit_event(ExecutionEvent::PipelineCancelled {
                execution_id,
                reason: format!("superseded by a newer run in group '{}'", key),
            });
            self.emit_event(ExecutionEvent::PipelineCompleted {
                execution_id,
                status: ExecutionStatus::Cancelled,
            });
            return Ok(());
        }

        self.update_state_counts(pipeline);
        let status = if pipeline.has_failures() {
            pipeline.state.fail();
            ExecutionStatus::Failed
        } else {
            pipeline.state.complete();
            ExecutionStatus::Completed
        };

        info!("Pipeline execution finished: {} - {:?}", pipeline_name, status);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });
        drop(guard);

        Ok(())
    }

    /// Record a stage result and release or block its dependants
    fn apply_result(
        &self,
        pipeline: &mut Pipeline,
        scheduler: &mut ExecutionScheduler,
        stage_id: &str,
        result: ExecutionResult,
    ) {
        let started_at = match pipeline.stage(stage_id).map(|s| &s.state) {
            Some(StageState::Running { started_at }) => *started_at,
            _ => chrono::Utc::now(),
        };
        let now = chrono::Utc::now();

        let (state, succeeded) = match result {
            ExecutionResult::Success { output } => {
                self.emit_event(ExecutionEvent::StageCompleted {
                    stage_id: stage_id.to_string(),
                    output: output.clone(),
                });
                (
                    StageState::Completed {
                        output,
                        warnings: Vec::new(),
                        started_at,
                        completed_at: now,
                    },
                    true,
                )
            }
            ExecutionResult::SuccessWithWarning { output, warning } => {
                warn!("Stage {} completed with warning: {}", stage_id, warning);
                self.emit_event(ExecutionEvent::StageWarning {
                    stage_id: stage_id.to_string(),
                    warning: warning.clone(),
                });
                self.emit_event(ExecutionEvent::StageCompleted {
                    stage_id: stage_id.to_string(),
                    output: output.clone(),
                });
                (
                    StageState::Completed {
                        output,
                        warnings: vec![warning],
                        started_at,
                        completed_at: now,
                    },
                    true,
                )
            }
            ExecutionResult::Skipped { reason } => {
                info!("Stage {} skipped: {}", stage_id, reason);
                self.emit_event(ExecutionEvent::StageSkipped {
                    stage_id: stage_id.to_string(),
                    reason: reason.clone(),
                });
                (StageState::Skipped { reason }, true)
            }
            ExecutionResult::Failed { error } => {
                self.emit_event(ExecutionEvent::StageFailed {
                    stage_id: stage_id.to_string(),
                    error: error.clone(),
                });
                (
                    StageState::Failed {
                        error,
                        started_at,
                        failed_at: now,
                    },
                    false,
                )
            }
        };

        if let Some(stage) = pipeline.stage_mut(stage_id) {
            stage.state = state;
        }

        if succeeded {
            scheduler.complete(stage_id);
        } else {
            for blocked in scheduler.fail(stage_id) {
                warn!("Stage {} blocked by failed stage {}", blocked, stage_id);
                if let Some(stage) = pipeline.stage_mut(&blocked) {
                    stage.state = StageState::Blocked {
                        reason: format!("dependency '{}' failed", stage_id),
                    };
                }
                self.emit_event(ExecutionEvent::StageBlocked {
                    stage_id: blocked,
                    blocked_by: stage_id.to_string(),
                });
            }
        }

        self.update_state_counts(pipeline);
    }

    /// Update pipeline state counts
    fn update_state_counts(&self, pipeline: &mut Pipeline) {
        let mut completed = 0;
        let mut failed = 0;
        let mut blocked = 0;

        for stage in pipeline.stages.values() {
            match &stage.state {
                StageState::Completed { .. } | StageState::Skipped { .. } => completed += 1,
                StageState::Failed { .. } => failed += 1,
                StageState::Blocked { .. } => blocked += 1,
                _ => {}
            }
        }

        pipeline.state.update_counts(completed, failed, blocked);
    }
}
