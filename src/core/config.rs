//! Release pipeline configuration from YAML

use crate::core::Pipeline;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level release pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Product name used in artifact names and release titles
    #[serde(default)]
    pub product: Option<String>,

    /// Version used when the trigger carries none
    #[serde(default = "default_version")]
    pub default_version: String,

    /// Global variables available to every template
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Release record settings
    #[serde(default)]
    pub release: ReleaseSettings,

    /// Superseded-run handling
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Pipeline stages
    pub stages: Vec<StageConfig>,

    /// Default timeout for stages (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

fn default_version() -> String {
    crate::core::version::DEFAULT_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

/// Release record settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// Title template of the release record
    #[serde(default = "default_title")]
    pub title: String,

    /// Body set when the record is first created
    #[serde(default = "default_placeholder_body")]
    pub placeholder_body: String,

    /// Tag pushes designate images as "latest" (pre-releases never do)
    #[serde(default = "default_true")]
    pub latest_on_tag: bool,

    /// Marker carried by machine-authored commits
    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_title() -> String {
    "{{ product }} v{{ version }}".to_string()
}

fn default_placeholder_body() -> String {
    "Release {{ version }} is being built. The changelog will follow.".to_string()
}

fn default_marker() -> String {
    "[release-bot]".to_string()
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            placeholder_body: default_placeholder_body(),
            latest_on_tag: true,
            marker: default_marker(),
        }
    }
}

/// Concurrency group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Group key template; runs with the same key supersede each other
    #[serde(default = "default_group")]
    pub group: String,

    /// Cancel the older run when a newer one registers
    #[serde(default = "default_true")]
    pub cancel_in_progress: bool,
}

fn default_group() -> String {
    "{{ name }}-{{ version }}".to_string()
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            cancel_in_progress: true,
        }
    }
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name
    #[serde(default)]
    pub name: Option<String>,

    /// Stage IDs this stage waits for
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Timeout for this stage (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// What the stage does
    #[serde(flatten)]
    pub kind: StageKindConfig,
}

/// Stage kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StageKindConfig {
    /// Write the version into manifests and commit the change
    Propagate {
        manifests: Vec<ManifestConfig>,
        #[serde(default)]
        commit: CommitConfig,
    },

    /// Build platform artifacts (installers, packages)
    Build {
        matrix: Vec<BuildJobConfig>,
        /// Attach each job's artifacts to the release record as it finishes
        #[serde(default)]
        publish: bool,
    },

    /// Build per-architecture images and store their digests
    ImageBuild {
        image: String,
        matrix: Vec<BuildJobConfig>,
    },

    /// Merge the digests of an image-build stage into one manifest list
    MergeImages {
        /// The image-build stage whose digests are merged
        from: String,
        #[serde(default = "default_registries")]
        registries: Vec<String>,
        #[serde(default)]
        extra_tags: Vec<String>,
    },

    /// Generate the changelog and finalize the release record
    Changelog,

    /// Trigger a sibling pipeline
    Dispatch {
        repository: String,
        event_type: String,
        /// Dispatch even when the run was not asked to
        #[serde(default)]
        always: bool,
    },
}

fn default_registries() -> Vec<String> {
    vec!["docker.io".to_string(), "ghcr.io".to_string()]
}

/// A manifest file carrying a version field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Path relative to the repository root
    pub path: PathBuf,

    /// Dotted path of the version field
    #[serde(default = "default_field")]
    pub field: String,

    /// Packaging target with its own version rules
    #[serde(default)]
    pub target: Option<PackagingTarget>,

    /// Whether the rewritten file is committed
    #[serde(default = "default_true")]
    pub commit: bool,
}

fn default_field() -> String {
    "version".to_string()
}

/// Packaging targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagingTarget {
    /// Installer metadata that rejects pre-release suffixes
    Windows,
    Macos,
    Linux,
    Android,
}

/// Version commit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Commit message template
    #[serde(default = "default_commit_message")]
    pub message: String,

    /// Branch to push to (current branch when absent)
    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Push after committing
    #[serde(default = "default_true")]
    pub push: bool,
}

fn default_commit_message() -> String {
    "chore(release): bump version to {{ version }} {{ marker }}".to_string()
}

fn default_author_name() -> String {
    "blinko-release[bot]".to_string()
}

fn default_author_email() -> String {
    "release-bot@users.noreply.github.com".to_string()
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            message: default_commit_message(),
            branch: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
            push: true,
        }
    }
}

/// One matrix entry of a build stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJobConfig {
    /// Platform identifier
    pub platform: String,

    /// Build command
    pub command: String,

    /// Command arguments (templates)
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables (templates)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Files the build produces
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,

    /// File the build writes its image digest to
    #[serde(default)]
    pub digest_file: Option<String>,
}

/// A produced file and its published name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Output path template, relative to the repository root
    pub path: String,

    /// Published name template
    #[serde(default)]
    pub rename: Option<String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Product name, falling back to the pipeline name
    pub fn product_name(&self) -> &str {
        self.product.as_deref().unwrap_or(&self.name)
    }

    fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen_ids = HashSet::new();
        for stage in &self.stages {
            if !seen_ids.insert(&stage.id) {
                anyhow::bail!("Duplicate stage ID: {}", stage.id);
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !seen_ids.contains(dep) {
                    anyhow::bail!("Stage '{}' depends on non-existent stage '{}'", stage.id, dep);
                }
            }

            match &stage.kind {
                StageKindConfig::Propagate { manifests, .. } => {
                    if manifests.is_empty() {
                        anyhow::bail!("Stage '{}' propagates to no manifests", stage.id);
                    }
                }
                StageKindConfig::Build { matrix, .. } | StageKindConfig::ImageBuild { matrix, .. } => {
                    if matrix.is_empty() {
                        anyhow::bail!("Stage '{}' has an empty build matrix", stage.id);
                    }
                    let mut platforms = HashSet::new();
                    for job in matrix {
                        if !platforms.insert(&job.platform) {
                            anyhow::bail!(
                                "Stage '{}' declares platform '{}' twice",
                                stage.id,
                                job.platform
                            );
                        }
                    }
                }
                StageKindConfig::MergeImages { from, registries, .. } => {
                    match self.stage(from).map(|s| &s.kind) {
                        Some(StageKindConfig::ImageBuild { .. }) => {}
                        Some(_) => anyhow::bail!(
                            "Stage '{}' merges from '{}', which is not an image-build stage",
                            stage.id,
                            from
                        ),
                        None => anyhow::bail!(
                            "Stage '{}' merges from non-existent stage '{}'",
                            stage.id,
                            from
                        ),
                    }
                    if !stage.depends_on.contains(from) {
                        anyhow::bail!("Stage '{}' must depend on '{}'", stage.id, from);
                    }
                    if registries.is_empty() {
                        anyhow::bail!("Stage '{}' publishes to no registries", stage.id);
                    }
                }
                StageKindConfig::Changelog | StageKindConfig::Dispatch { .. } => {}
            }
        }

        self.check_cycles()?;
        self.check_changelog_barrier()?;

        Ok(())
    }

    /// Check for cycles in the stage dependency graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for stage in &self.stages {
            if !visited.contains(&stage.id) {
                self.dfs_check(&stage.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        stage_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(stage_id.to_string());
        recursion_stack.insert(stage_id.to_string());

        if let Some(stage) = self.stage(stage_id) {
            for dep in &stage.depends_on {
                if recursion_stack.contains(dep) {
                    anyhow::bail!("Cycle detected in dependency graph involving stage '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(stage_id);
        Ok(())
    }

    /// A changelog stage must wait, directly or transitively, for every
    /// build and merge stage.
    fn check_changelog_barrier(&self) -> Result<()> {
        for stage in &self.stages {
            if !matches!(stage.kind, StageKindConfig::Changelog) {
                continue;
            }

            let ancestors = self.ancestors(&stage.id);
            for other in &self.stages {
                let gated = matches!(
                    other.kind,
                    StageKindConfig::Build { .. }
                        | StageKindConfig::ImageBuild { .. }
                        | StageKindConfig::MergeImages { .. }
                );
                if gated && !ancestors.contains(other.id.as_str()) {
                    anyhow::bail!(
                        "Changelog stage '{}' must depend on '{}'",
                        stage.id,
                        other.id
                    );
                }
            }
        }
        Ok(())
    }

    fn ancestors(&self, stage_id: &str) -> HashSet<&str> {
        let mut result = HashSet::new();
        let mut stack = vec![stage_id];
        while let Some(id) = stack.pop() {
            if let Some(stage) = self.stage(id) {
                for dep in &stage.depends_on {
                    if result.insert(dep.as_str()) {
                        stack.push(dep);
                    }
                }
            }
        }
        result
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
