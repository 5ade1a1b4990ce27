//! Per-architecture digest collection and multi-architecture manifest merge

use crate::capability::{ArtifactStore, CapabilityError, Registry};
use crate::core::{DigestError, ImageDigest, ManifestList, PipelineContext, Platform, ReleaseVersion};
use crate::release::fanout::{JobError, JobOutput, JobSink};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Missing digests for {}", join_platforms(.0))]
    MissingDigests(Vec<Platform>),

    #[error("Stored digest is invalid: {0}")]
    InvalidDigest(#[from] DigestError),

    #[error("No platforms declared for {0}")]
    NoPlatforms(String),

    #[error("Artifact store error: {0}")]
    Store(#[source] CapabilityError),

    #[error("Push to {host} failed: {source}")]
    Push {
        host: String,
        #[source]
        source: CapabilityError,
    },

    #[error("Cannot serialize manifest list: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The release and run a set of stored digests belongs to.
///
/// Every run writes under its own names, so a rerun of a release or the next
/// release never meets digests left behind by an earlier run, and a merge
/// only ever reads digests its own run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestScope {
    version: ReleaseVersion,
    run_id: Uuid,
}

impl DigestScope {
    pub fn new(version: ReleaseVersion, run_id: Uuid) -> Self {
        Self { version, run_id }
    }

    pub fn from_context(context: &PipelineContext) -> Self {
        Self::new(context.version().clone(), context.run_id)
    }

    pub fn version(&self) -> &ReleaseVersion {
        &self.version
    }

    /// Name of the artifact holding a platform's digest
    pub fn artifact_name(&self, platform: &Platform) -> String {
        format!(
            "digests-{}-{}-{}",
            self.version,
            self.run_id.simple(),
            platform.slug()
        )
    }
}

/// Tags a release is published under
pub fn image_tags(version: &ReleaseVersion, set_latest: bool, extra: &[String]) -> Vec<String> {
    let mut tags = vec![version.to_string()];
    if set_latest {
        tags.push("latest".to_string());
    }
    tags.extend(extra.iter().filter(|t| !t.trim().is_empty()).cloned());
    tags
}

/// Stores each image job's digest under its unique artifact name
pub struct DigestSink {
    store: Arc<dyn ArtifactStore>,
    scope: DigestScope,
}

impl DigestSink {
    pub fn new(store: Arc<dyn ArtifactStore>, scope: DigestScope) -> Self {
        Self { store, scope }
    }
}

#[async_trait]
impl JobSink for DigestSink {
    async fn accept(&self, output: &JobOutput) -> Result<(), JobError> {
        let digest = output.digest.as_ref().ok_or(JobError::MissingDigest)?;
        let name = self.scope.artifact_name(&output.platform);

        match self.store.upload(&name, digest.digest()).await {
            Ok(()) => Ok(()),
            // The same job reporting twice within one run
            Err(CapabilityError::AlreadyExists(_)) => {
                let existing = self.store.download(&name).await.map_err(JobError::Store)?;
                if existing.as_deref().map(str::trim) == Some(digest.digest()) {
                    Ok(())
                } else {
                    Err(JobError::Store(CapabilityError::AlreadyExists(format!(
                        "{} with a different digest",
                        name
                    ))))
                }
            }
            Err(e) => Err(JobError::Store(e)),
        }
    }
}

/// Reads back the digests of the declared platforms
pub struct DigestCollector {
    store: Arc<dyn ArtifactStore>,
}

impl DigestCollector {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// All digests of `scope`, or `MissingDigests` naming every absent platform
    pub async fn collect(
        &self,
        scope: &DigestScope,
        platforms: &[Platform],
    ) -> Result<Vec<ImageDigest>, MergeError> {
        let mut digests = Vec::with_capacity(platforms.len());
        let mut missing = Vec::new();

        for platform in platforms {
            let name = scope.artifact_name(platform);
            match self.store.download(&name).await.map_err(MergeError::Store)? {
                Some(value) => {
                    digests.push(ImageDigest::new(platform.clone(), scope.version().clone(), &value)?)
                }
                None => missing.push(platform.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(MergeError::MissingDigests(missing));
        }
        Ok(digests)
    }
}

/// Published manifest list
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub list: ManifestList,
    /// Host -> digest reported by the registry
    pub published: Vec<(String, String)>,
}

pub struct ManifestMerger {
    collector: DigestCollector,
    registry: Arc<dyn Registry>,
}

impl ManifestMerger {
    pub fn new(store: Arc<dyn ArtifactStore>, registry: Arc<dyn Registry>) -> Self {
        Self {
            collector: DigestCollector::new(store),
            registry,
        }
    }

    /// Merge the platforms' digests and push the list to every registry.
    ///
    /// Nothing is pushed unless every declared platform has a digest.
    pub async fn merge(
        &self,
        image: &str,
        scope: &DigestScope,
        platforms: &[Platform],
        tags: &[String],
        registries: &[String],
    ) -> Result<MergeReport, MergeError> {
        if platforms.is_empty() {
            return Err(MergeError::NoPlatforms(image.to_string()));
        }

        let digests = self.collector.collect(scope, platforms).await?;
        let list = ManifestList::new(image, tags.iter().cloned(), &digests);
        info!(
            "Merging {} digest(s) for {} under [{}] (list {})",
            list.manifests.len(),
            image,
            list.tags.join(", "),
            list.digest()?
        );

        let mut published = Vec::with_capacity(registries.len());
        for host in registries {
            let digest = self
                .registry
                .push_manifest_list(host, &list)
                .await
                .map_err(|source| {
                    warn!("Push to {} failed: {}", host, source);
                    MergeError::Push {
                        host: host.clone(),
                        source,
                    }
                })?;
            published.push((host.clone(), digest));
        }

        Ok(MergeReport { list, published })
    }
}
