//! Stage executor - runs individual stages against the capabilities

use crate::{
    capability::Capabilities,
    core::{PipelineContext, Stage, StageKind},
    release::{
        fanout::FanOutJob,
        manifest::image_tags,
        ChangelogGenerator, DigestScope, DigestSink, DispatchOutcome, ManifestMerger,
        PlatformFanOut, PropagationOutcome, ReleasePublisher, ReleaseSink, SiblingDispatcher,
        VersionPropagator,
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

/// Result of executing a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Stage completed successfully
    Success { output: String },

    /// Stage completed, but something non-fatal went wrong
    SuccessWithWarning { output: String, warning: String },

    /// Stage had nothing to do
    Skipped { reason: String },

    /// Stage failed; its dependants will not run
    Failed { error: String },
}

impl ExecutionResult {
    fn failed(error: impl ToString) -> Self {
        ExecutionResult::Failed {
            error: error.to_string(),
        }
    }
}

/// Executes a single stage
pub struct StageExecutor {
    capabilities: Capabilities,
    root: PathBuf,
    dry_run: bool,
}

impl StageExecutor {
    pub fn new(capabilities: Capabilities, root: impl Into<PathBuf>) -> Self {
        Self {
            capabilities,
            root: root.into(),
            dry_run: false,
        }
    }

    /// Do not write to the working tree
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute a stage and return the result
    pub async fn execute(&self, stage: &Stage, context: &PipelineContext) -> ExecutionResult {
        info!("Executing stage: {} ({})", stage.id, stage.kind.label());

        let timeout_duration = Duration::from_secs(stage.timeout_secs);
        match timeout(timeout_duration, self.run(stage, context)).await {
            Ok(result) => {
                if let ExecutionResult::Failed { error } = &result {
                    error!("Stage {} failed: {}", stage.id, error);
                }
                result
            }
            Err(_) => {
                error!("Timeout for stage {} after {}s", stage.id, stage.timeout_secs);
                ExecutionResult::failed(format!("Timeout after {} seconds", stage.timeout_secs))
            }
        }
    }

    fn publisher(&self, context: &PipelineContext) -> ReleasePublisher {
        ReleasePublisher::new(
            self.capabilities.release_host.clone(),
            &context.release_title,
            &context.placeholder_body,
        )
    }

    async fn run(&self, stage: &Stage, context: &PipelineContext) -> ExecutionResult {
        let version = context.version();

        match &stage.kind {
            StageKind::Propagate { manifests, commit } => {
                let mut commit = commit.clone();
                commit.message = context.render(&commit.message);

                let mut propagator = VersionPropagator::new(
                    &self.root,
                    self.capabilities.source_control.clone(),
                    &context.marker,
                );
                if self.dry_run {
                    propagator = propagator.without_writes();
                }

                match propagator.propagate(version, manifests, &commit).await {
                    Ok(report) => match report.outcome {
                        PropagationOutcome::Unchanged => ExecutionResult::Success {
                            output: format!("Manifests already at {}", version),
                        },
                        PropagationOutcome::Committed { sha, files } => ExecutionResult::Success {
                            output: format!("Committed {} ({} file(s))", sha, files.len()),
                        },
                    },
                    Err(e) => ExecutionResult::failed(e),
                }
            }

            StageKind::Build { jobs, publish } => {
                let planned: Vec<FanOutJob> = jobs
                    .iter()
                    .map(|job| FanOutJob::plan(job, context, stage.timeout_secs, false))
                    .collect();

                let mut fanout = PlatformFanOut::new(self.capabilities.builder.clone());
                if *publish {
                    let publisher = Arc::new(self.publisher(context));
                    fanout = fanout.with_sink(Arc::new(ReleaseSink::new(publisher, version.clone())));
                }

                let outcome = fanout.run(version, planned).await;
                if !outcome.is_success() {
                    return ExecutionResult::failed(format!(
                        "{} of {} build(s) failed: {}",
                        outcome.failed.len(),
                        jobs.len(),
                        outcome.failure_summary()
                    ));
                }

                let artifacts: usize = outcome.succeeded.iter().map(|o| o.artifacts.len()).sum();
                ExecutionResult::Success {
                    output: format!(
                        "Built {} platform(s), {} artifact(s){}",
                        outcome.succeeded.len(),
                        artifacts,
                        if *publish { " published" } else { "" }
                    ),
                }
            }

            StageKind::ImageBuild { image, jobs } => {
                let planned: Vec<FanOutJob> = jobs
                    .iter()
                    .map(|job| FanOutJob::plan(job, context, stage.timeout_secs, true))
                    .collect();

                let sink = Arc::new(DigestSink::new(
                    self.capabilities.artifacts.clone(),
                    DigestScope::from_context(context),
                ));
                let outcome = PlatformFanOut::new(self.capabilities.builder.clone())
                    .with_sink(sink)
                    .run(version, planned)
                    .await;

                if !outcome.is_success() {
                    return ExecutionResult::failed(format!(
                        "{} of {} image build(s) for {} failed: {}",
                        outcome.failed.len(),
                        jobs.len(),
                        image,
                        outcome.failure_summary()
                    ));
                }

                for output in &outcome.succeeded {
                    if let Some(digest) = &output.digest {
                        debug!("{} {} -> {}", image, output.platform, digest.digest());
                    }
                }
                ExecutionResult::Success {
                    output: format!("Stored {} digest(s) for {}", outcome.succeeded.len(), image),
                }
            }

            StageKind::MergeImages {
                image,
                platforms,
                registries,
                extra_tags,
            } => {
                let image = context.render(image);
                let extra: Vec<String> = extra_tags.iter().map(|t| context.render(t)).collect();
                let tags = image_tags(version, context.resolution.set_latest, &extra);

                let merger = ManifestMerger::new(
                    self.capabilities.artifacts.clone(),
                    self.capabilities.registry.clone(),
                );
                let scope = DigestScope::from_context(context);
                match merger.merge(&image, &scope, platforms, &tags, registries).await {
                    Ok(report) => ExecutionResult::Success {
                        output: format!(
                            "Published {}:{{{}}} to {}",
                            report.list.repository,
                            report.list.tags.join(","),
                            report
                                .published
                                .iter()
                                .map(|(host, digest)| format!("{} ({})", host, digest))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    },
                    Err(e) => ExecutionResult::failed(e),
                }
            }

            StageKind::Changelog => {
                let generator = ChangelogGenerator::new(
                    self.capabilities.source_control.clone(),
                    &context.marker,
                );
                let changelog = match generator.generate(version).await {
                    Ok(changelog) => changelog,
                    Err(e) => return ExecutionResult::failed(e),
                };

                match self.publisher(context).update_body(version, &changelog.render()).await {
                    Ok(record) => ExecutionResult::Success {
                        output: format!(
                            "Updated {} with {} changelog section(s)",
                            record.tag,
                            changelog.sections.len()
                        ),
                    },
                    Err(e) => ExecutionResult::failed(e),
                }
            }

            StageKind::Dispatch {
                repository,
                event_type,
                always,
            } => {
                let sha = match context.trigger.sha() {
                    Some(sha) => Some(sha.to_string()),
                    None => self.capabilities.source_control.head_sha().await.ok(),
                };

                let repository = context.render(repository);
                let outcome = SiblingDispatcher::new(self.capabilities.dispatcher.clone())
                    .dispatch(
                        &context.resolution,
                        &repository,
                        event_type,
                        sha.as_deref(),
                        *always,
                    )
                    .await;

                match outcome {
                    DispatchOutcome::Sent {
                        repository,
                        event_type,
                    } => ExecutionResult::Success {
                        output: format!("Dispatched {} to {}", event_type, repository),
                    },
                    DispatchOutcome::Skipped(reason) => ExecutionResult::Skipped { reason },
                    DispatchOutcome::Failed { warning } => ExecutionResult::SuccessWithWarning {
                        output: "Sibling pipeline not triggered".to_string(),
                        warning,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::MemoryCapabilities;
    use crate::core::config::PipelineConfig;
    use crate::core::{Pipeline, TriggerContext};

    fn bound(yaml: &str, tag: &str) -> Pipeline {
        let mut pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline();
        pipeline
            .bind_release(TriggerContext::TagPush {
                git_ref: format!("refs/tags/{}", tag),
            })
            .unwrap();
        pipeline
    }

    const YAML: &str = r#"
name: "blinko"
product: "Blinko"
stages:
  - id: "desktop"
    kind: build
    publish: true
    timeout_secs: 1
    matrix:
      - platform: "windows-x64"
        command: "bun"
        artifacts:
          - path: "dist/blinko.msi"
            rename: "{{ product }}_{{ version }}_x64.msi"
  - id: "sibling"
    kind: dispatch
    repository: "blinkospace/blinko-desktop"
    event_type: "release"
"#;

    #[tokio::test]
    async fn test_build_publishes_renamed_artifact() {
        let fakes = MemoryCapabilities::new();
        let executor = StageExecutor::new(fakes.capabilities(), ".");
        let pipeline = bound(YAML, "v1.2.3");
        let stage = pipeline.stage("desktop").unwrap();
        let context = pipeline.create_context_for_stage("desktop").unwrap();

        let result = executor.execute(stage, &context).await;
        assert!(matches!(result, ExecutionResult::Success { .. }), "{:?}", result);

        let record = fakes.release_host.record("v1.2.3").unwrap();
        assert_eq!(record.asset_names(), vec!["Blinko_1.2.3_x64.msi"]);
    }

    #[tokio::test]
    async fn test_dispatch_skipped_without_request() {
        let fakes = MemoryCapabilities::new();
        let executor = StageExecutor::new(fakes.capabilities(), ".");
        let pipeline = bound(YAML, "v1.2.3");
        let context = pipeline.create_context_for_stage("sibling").unwrap();

        let result = executor.execute(pipeline.stage("sibling").unwrap(), &context).await;
        assert!(matches!(result, ExecutionResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let fakes = MemoryCapabilities::new();
        fakes.builder.set_delay(Duration::from_secs(5));
        let executor = StageExecutor::new(fakes.capabilities(), ".");
        let pipeline = bound(YAML, "v1.2.3");
        let context = pipeline.create_context_for_stage("desktop").unwrap();

        let result = executor.execute(pipeline.stage("desktop").unwrap(), &context).await;
        assert_eq!(
            result,
            ExecutionResult::Failed {
                error: "Timeout after 1 seconds".to_string()
            }
        );
    }
}
