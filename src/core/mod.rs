//! Core domain models for the release pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, release versions and build outputs.

pub mod artifact;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod version;

pub use artifact::*;
pub use context::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use version::*;
