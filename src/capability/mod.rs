//! External services the orchestrator calls through
//!
//! Each capability is a narrow async trait. The `system` implementations
//! shell out to the real tools; the `memory` implementations keep state in
//! process and back the test suite and dry runs.

pub mod config;
pub mod memory;
pub mod system;

use crate::core::{BuildArtifact, ManifestList, Platform, ReleaseRecord, ReleaseVersion};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use config::CapabilityConfig;
pub use memory::MemoryCapabilities;

/// Error types for capability calls
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("`{command}` exited with code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A commit to create and push
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Changed files with their new content, relative to the repository root
    pub files: Vec<(PathBuf, String)>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub branch: Option<String>,
    pub push: bool,
}

/// A commit in history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub subject: String,
}

/// Version control
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Content of a file at HEAD; `None` when the file is not tracked
    async fn read_committed(&self, path: &std::path::Path) -> Result<Option<String>, CapabilityError>;

    /// Stage the files, commit, and push when requested. Returns the new sha.
    async fn commit_and_push(&self, request: &CommitRequest) -> Result<String, CapabilityError>;

    /// All tag names
    async fn list_tags(&self) -> Result<Vec<String>, CapabilityError>;

    /// Commits reachable from `to` (HEAD when `None`) but not from `from`,
    /// oldest first
    async fn commits_between(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<CommitInfo>, CapabilityError>;

    /// Current HEAD sha
    async fn head_sha(&self) -> Result<String, CapabilityError>;
}

/// Storage for named artifacts passed between jobs
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store under a unique name; fails with `AlreadyExists` if taken
    async fn upload(&self, name: &str, content: &str) -> Result<(), CapabilityError>;

    async fn download(&self, name: &str) -> Result<Option<String>, CapabilityError>;
}

/// Container registries
#[async_trait]
pub trait Registry: Send + Sync {
    /// Push a manifest list to `host` under all of its tags. Returns the
    /// digest the registry reports.
    async fn push_manifest_list(
        &self,
        host: &str,
        list: &ManifestList,
    ) -> Result<String, CapabilityError>;
}

/// Release hosting service
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    async fn find_release(&self, tag: &str) -> Result<Option<ReleaseRecord>, CapabilityError>;

    /// Fails with `AlreadyExists` when a record with that tag exists
    async fn create_release(&self, record: &ReleaseRecord) -> Result<ReleaseRecord, CapabilityError>;

    /// Attach an asset, replacing an existing asset of the same name only
    async fn upload_asset(&self, tag: &str, asset: &BuildArtifact) -> Result<(), CapabilityError>;

    async fn update_body(&self, tag: &str, body: &str) -> Result<ReleaseRecord, CapabilityError>;
}

/// A rendered build job
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub platform: Platform,
    pub version: ReleaseVersion,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Files the job must produce
    pub artifacts: Vec<PathBuf>,
    /// Where the job writes its image digest, for image builds
    pub digest_file: Option<PathBuf>,
    /// Image builds report a digest
    pub expects_digest: bool,
    pub timeout_secs: u64,
}

/// What a build produced
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub artifacts: Vec<PathBuf>,
    pub digest: Option<String>,
}

/// Runs platform builds
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, job: &BuildJob) -> Result<BuildOutput, CapabilityError>;
}

/// Triggers other pipelines
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        repository: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CapabilityError>;
}

/// The full set of capabilities a run needs
#[derive(Clone)]
pub struct Capabilities {
    pub source_control: Arc<dyn SourceControl>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub registry: Arc<dyn Registry>,
    pub release_host: Arc<dyn ReleaseHost>,
    pub builder: Arc<dyn Builder>,
    pub dispatcher: Arc<dyn Dispatcher>,
}
