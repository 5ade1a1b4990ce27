//! Pipeline execution engine

pub mod concurrency;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use concurrency::{ConcurrencyGroups, GroupFiles, RunGuard};
pub use engine::{EngineError, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StageExecutor};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
