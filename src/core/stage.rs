//! Stage domain model

use crate::core::{
    artifact::Platform,
    config::{
        ArtifactConfig, BuildJobConfig, CommitConfig, ManifestConfig, PipelineConfig,
        StageConfig, StageKindConfig,
    },
    state::StageState,
};
use std::collections::{HashMap, HashSet};

/// A single stage in a release pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Stage IDs this stage waits for
    pub dependencies: Vec<String>,

    /// What the stage does
    pub kind: StageKind,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Runtime state
    pub state: StageState,
}

/// Build job template; arguments are rendered per run
#[derive(Debug, Clone)]
pub struct BuildJobSpec {
    pub platform: Platform,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub artifacts: Vec<ArtifactConfig>,
    pub digest_file: Option<String>,
}

impl From<&BuildJobConfig> for BuildJobSpec {
    fn from(config: &BuildJobConfig) -> Self {
        Self {
            platform: Platform::new(config.platform.clone()),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            artifacts: config.artifacts.clone(),
            digest_file: config.digest_file.clone(),
        }
    }
}

/// Resolved stage behavior
#[derive(Debug, Clone)]
pub enum StageKind {
    Propagate {
        manifests: Vec<ManifestConfig>,
        commit: CommitConfig,
    },
    Build {
        jobs: Vec<BuildJobSpec>,
        publish: bool,
    },
    ImageBuild {
        image: String,
        jobs: Vec<BuildJobSpec>,
    },
    /// Platforms are taken from the source image-build stage
    MergeImages {
        image: String,
        platforms: Vec<Platform>,
        registries: Vec<String>,
        extra_tags: Vec<String>,
    },
    Changelog,
    Dispatch {
        repository: String,
        event_type: String,
        always: bool,
    },
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Propagate { .. } => "propagate",
            StageKind::Build { .. } => "build",
            StageKind::ImageBuild { .. } => "image-build",
            StageKind::MergeImages { .. } => "merge-images",
            StageKind::Changelog => "changelog",
            StageKind::Dispatch { .. } => "dispatch",
        }
    }
}

impl Stage {
    /// Create a stage from its config; `pipeline` resolves cross-stage references
    pub fn from_config(config: &StageConfig, pipeline: &PipelineConfig, default_timeout: u64) -> Self {
        let kind = match &config.kind {
            StageKindConfig::Propagate { manifests, commit } => StageKind::Propagate {
                manifests: manifests.clone(),
                commit: commit.clone(),
            },
            StageKindConfig::Build { matrix, publish } => StageKind::Build {
                jobs: matrix.iter().map(BuildJobSpec::from).collect(),
                publish: *publish,
            },
            StageKindConfig::ImageBuild { image, matrix } => StageKind::ImageBuild {
                image: image.clone(),
                jobs: matrix.iter().map(BuildJobSpec::from).collect(),
            },
            StageKindConfig::MergeImages {
                from,
                registries,
                extra_tags,
            } => {
                let (image, platforms) = pipeline
                    .stages
                    .iter()
                    .find(|s| &s.id == from)
                    .and_then(|s| match &s.kind {
                        StageKindConfig::ImageBuild { image, matrix } => Some((
                            image.clone(),
                            matrix.iter().map(|j| Platform::new(j.platform.clone())).collect(),
                        )),
                        _ => None,
                    })
                    .unwrap_or_default();
                StageKind::MergeImages {
                    image,
                    platforms,
                    registries: registries.clone(),
                    extra_tags: extra_tags.clone(),
                }
            }
            StageKindConfig::Changelog => StageKind::Changelog,
            StageKindConfig::Dispatch {
                repository,
                event_type,
                always,
            } => StageKind::Dispatch {
                repository: repository.clone(),
                event_type: event_type.clone(),
                always: *always,
            },
        };

        Stage {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            dependencies: config.depends_on.clone(),
            kind,
            timeout_secs: config.timeout_secs.unwrap_or(default_timeout),
            state: StageState::Pending,
        }
    }

    /// Check if every dependency is in the given set
    pub fn dependencies_met(&self, finished: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| finished.contains(dep))
    }
}

/// Replace `{{ name }}` placeholders with variable values
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{ {} }}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    rendered
}
