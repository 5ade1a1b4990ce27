//! blinko-release - release orchestration for Blinko

pub mod capability;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod release;

// Re-export commonly used types
pub use capability::{Capabilities, CapabilityConfig, MemoryCapabilities};
pub use core::{ExecutionStatus, Pipeline, PipelineContext, ReleaseVersion, Stage, StageState, TriggerContext};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy, StageExecutor};
