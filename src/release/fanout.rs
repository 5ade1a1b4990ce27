//! Parallel per-platform builds
//!
//! Every job runs on its own task with no state shared between jobs. A
//! failing job never cancels its siblings; the caller decides what a partial
//! outcome means for the stage.

use crate::capability::{BuildJob, Builder, CapabilityError};
use crate::core::{
    BuildArtifact, BuildJobSpec, DigestError, ImageDigest, PipelineContext, Platform, ReleaseVersion,
};
use crate::release::publisher::PublishError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("build failed: {0}")]
    Build(#[source] CapabilityError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("build reported no image digest")]
    MissingDigest,

    #[error("publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("storing digest failed: {0}")]
    Store(#[source] CapabilityError),

    #[error("job aborted: {0}")]
    Aborted(String),
}

/// An output file and the name it is published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    pub path: PathBuf,
    pub name: String,
}

/// A build job with its rendered artifact names
#[derive(Debug, Clone)]
pub struct FanOutJob {
    pub build: BuildJob,
    pub artifacts: Vec<PlannedArtifact>,
}

impl FanOutJob {
    /// Render a matrix entry against the run context.
    ///
    /// Templates see the context variables plus `platform` (as declared,
    /// e.g. `linux/amd64`) and `platform_slug` (`linux-amd64`).
    pub fn plan(
        spec: &BuildJobSpec,
        context: &PipelineContext,
        timeout_secs: u64,
        expects_digest: bool,
    ) -> Self {
        let slug = spec.platform.slug();
        let extra = [
            ("platform", spec.platform.as_str()),
            ("platform_slug", slug.as_str()),
        ];
        let render = |template: &str| context.render_with(template, &extra);

        let artifacts: Vec<PlannedArtifact> = spec
            .artifacts
            .iter()
            .map(|artifact| {
                let path = PathBuf::from(render(&artifact.path));
                let name = match &artifact.rename {
                    Some(rename) => render(rename),
                    None => file_name(&path),
                };
                PlannedArtifact { path, name }
            })
            .collect();

        let build = BuildJob {
            platform: spec.platform.clone(),
            version: context.version().clone(),
            command: render(&spec.command),
            args: spec.args.iter().map(|arg| render(arg)).collect(),
            env: spec
                .env
                .iter()
                .map(|(key, value)| (key.clone(), render(value)))
                .collect(),
            artifacts: artifacts.iter().map(|a| a.path.clone()).collect(),
            digest_file: spec.digest_file.as_deref().map(|f| PathBuf::from(render(f))),
            expects_digest,
            timeout_secs,
        };

        Self { build, artifacts }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// What one successful job produced
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub platform: Platform,
    pub artifacts: Vec<BuildArtifact>,
    pub digest: Option<ImageDigest>,
}

/// Receives each job's output as soon as the job finishes
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn accept(&self, output: &JobOutput) -> Result<(), JobError>;
}

#[derive(Debug, Default)]
pub struct FanOutOutcome {
    pub succeeded: Vec<JobOutput>,
    pub failed: Vec<(Platform, String)>,
}

impl FanOutOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// One line per failed platform
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|(platform, error)| format!("{}: {}", platform, error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct PlatformFanOut {
    builder: Arc<dyn Builder>,
    sink: Option<Arc<dyn JobSink>>,
}

impl PlatformFanOut {
    pub fn new(builder: Arc<dyn Builder>) -> Self {
        Self { builder, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn JobSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run every job to completion
    pub async fn run(&self, version: &ReleaseVersion, jobs: Vec<FanOutJob>) -> FanOutOutcome {
        let mut pending: BTreeSet<Platform> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for job in jobs {
            pending.insert(job.build.platform.clone());
            let builder = self.builder.clone();
            let sink = self.sink.clone();
            let version = version.clone();

            tasks.spawn(async move {
                let platform = job.build.platform.clone();
                let result = run_job(builder.as_ref(), sink.as_deref(), &version, job).await;
                (platform, result)
            });
        }

        let mut outcome = FanOutOutcome::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((platform, Ok(output))) => {
                    info!("Build for {} finished", platform);
                    pending.remove(&platform);
                    outcome.succeeded.push(output);
                }
                Ok((platform, Err(e))) => {
                    error!("Build for {} failed: {}", platform, e);
                    pending.remove(&platform);
                    outcome.failed.push((platform, e.to_string()));
                }
                Err(join_error) => {
                    error!("Build task ended abnormally: {}", join_error);
                }
            }
        }

        // Platforms whose task panicked never reported back
        for platform in pending {
            outcome
                .failed
                .push((platform, JobError::Aborted("task panicked".to_string()).to_string()));
        }

        outcome.succeeded.sort_by(|a, b| a.platform.cmp(&b.platform));
        outcome.failed.sort();
        outcome
    }
}

async fn run_job(
    builder: &dyn Builder,
    sink: Option<&dyn JobSink>,
    version: &ReleaseVersion,
    job: FanOutJob,
) -> Result<JobOutput, JobError> {
    let built = builder.build(&job.build).await.map_err(JobError::Build)?;
    let platform = job.build.platform.clone();

    let digest = match built.digest {
        Some(value) => Some(ImageDigest::new(platform.clone(), version.clone(), &value)?),
        None if job.build.expects_digest => return Err(JobError::MissingDigest),
        None => None,
    };

    let artifacts = job
        .artifacts
        .into_iter()
        .map(|planned| BuildArtifact {
            platform: platform.clone(),
            version: version.clone(),
            name: planned.name,
            path: planned.path,
        })
        .collect();

    let output = JobOutput {
        platform,
        artifacts,
        digest,
    };

    if let Some(sink) = sink {
        sink.accept(&output).await?;
    }

    Ok(output)
}
