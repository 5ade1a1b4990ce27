//! Configuration of the system capabilities

use std::path::PathBuf;

/// Configuration for the tool-backed capabilities
#[derive(Debug, Clone)]
pub struct CapabilityConfig {
    /// Repository root; git runs here and manifest paths are relative to it
    pub root: PathBuf,

    /// `owner/name` of the repository hosting releases (current repo when absent)
    pub repository: Option<String>,

    /// Directory backing the artifact store
    pub artifact_dir: PathBuf,

    /// Timeout for tool invocations in seconds
    pub timeout_secs: u64,

    /// Path to the `git` executable
    pub git_path: String,

    /// Path to the `gh` executable
    pub gh_path: String,

    /// Path to the `docker` executable
    pub docker_path: String,

    /// Registry the per-architecture images were pushed to; every mirror's
    /// manifest list is assembled from there
    pub image_source_host: String,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            repository: None,
            artifact_dir: PathBuf::from(".release-artifacts"),
            timeout_secs: 600,
            git_path: "git".to_string(),
            gh_path: "gh".to_string(),
            docker_path: "docker".to_string(),
            image_source_host: "docker.io".to_string(),
        }
    }
}

impl CapabilityConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            artifact_dir: root.join(".release-artifacts"),
            root,
            ..Self::default()
        }
    }

    pub fn with_repository(mut self, repository: String) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_artifact_dir(mut self, dir: PathBuf) -> Self {
        self.artifact_dir = dir;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_image_source_host(mut self, host: impl Into<String>) -> Self {
        self.image_source_host = host.into();
        self
    }
}
