//! Persistence layer for release run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::Pipeline;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a release run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Release version the run resolved, if it got that far
    pub release_version: Option<String>,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Completed or skipped stages
    pub completed_stages: usize,

    pub failed_stages: usize,

    pub blocked_stages: usize,

    /// Total number of stages
    pub total_stages: usize,
}

impl ExecutionSummary {
    /// Fraction of stages that reached a terminal state
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.completed_stages + self.failed_stages + self.blocked_stages) as f64
            / self.total_stages as f64
    }
}

/// Stored form of a status
pub fn status_name(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

pub fn parse_status(name: &str) -> ExecutionStatus {
    match name {
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Pending,
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run, replacing an earlier save of the same run
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all executions for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution of a pipeline
    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipeline_name).await?.into_iter().next())
    }

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        Ok(self.executions.read().await.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let mut result: Vec<ExecutionSummary> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .executions
            .read()
            .await
            .values()
            .map(|e| e.pipeline_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a pipeline
pub fn create_summary(pipeline: &Pipeline) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: pipeline.state.execution_id,
        pipeline_name: pipeline.name.clone(),
        release_version: pipeline.resolution().map(|r| r.version.to_string()),
        status: pipeline.state.status,
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        completed_stages: pipeline.state.completed_stages,
        failed_stages: pipeline.state.failed_stages,
        blocked_stages: pipeline.state.blocked_stages,
        total_stages: pipeline.state.total_stages,
    }
}
