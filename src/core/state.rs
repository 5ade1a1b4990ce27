//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every stage completed or was skipped
    Completed,
    /// At least one stage failed or was blocked
    Failed,
    /// A newer run for the same concurrency group superseded this one
    Cancelled,
}

/// State of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Waiting for predecessors
    Pending,
    /// Currently running
    Running { started_at: DateTime<Utc> },
    /// Completed successfully
    Completed {
        output: String,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Failed; dependants are blocked
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Nothing to do (e.g. dispatch not requested)
    Skipped { reason: String },
    /// A predecessor failed, so the stage never ran
    Blocked { reason: String },
    /// The run was superseded while the stage was pending or running
    Cancelled,
}

impl StageState {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageState::Pending | StageState::Running { .. })
    }

    /// Completed or skipped: dependants may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, StageState::Completed { .. } | StageState::Skipped { .. })
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of completed or skipped stages
    pub completed_stages: usize,

    /// Number of failed stages
    pub failed_stages: usize,

    /// Number of blocked stages
    pub blocked_stages: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stages: 0,
            blocked_stages: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as cancelled
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Update stage counts
    pub fn update_counts(&mut self, completed: usize, failed: usize, blocked: usize) {
        self.completed_stages = completed;
        self.failed_stages = failed;
        self.blocked_stages = blocked;
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.completed_stages + self.failed_stages + self.blocked_stages) as f64
            / self.total_stages as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
