//! Release record creation and asset attachment

use crate::capability::{CapabilityError, ReleaseHost};
use crate::core::{BuildArtifact, ReleaseRecord, ReleaseVersion};
use crate::release::fanout::{JobError, JobOutput, JobSink};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Artifact {name} is for version {artifact}, release is {release}")]
    VersionMismatch {
        name: String,
        artifact: String,
        release: String,
    },

    #[error("Release {0} disappeared while publishing")]
    Vanished(String),

    #[error("Release host error: {0}")]
    Host(#[from] CapabilityError),
}

/// Publishes to the release record tagged `v<version>`.
///
/// Every operation creates the record when absent, so callers may run in
/// any order and concurrently.
pub struct ReleasePublisher {
    host: Arc<dyn ReleaseHost>,
    title: String,
    placeholder_body: String,
}

impl ReleasePublisher {
    pub fn new(host: Arc<dyn ReleaseHost>, title: &str, placeholder_body: &str) -> Self {
        Self {
            host,
            title: title.to_string(),
            placeholder_body: placeholder_body.to_string(),
        }
    }

    /// Find the record or create it with the placeholder body
    pub async fn ensure_record(&self, version: &ReleaseVersion) -> Result<ReleaseRecord, PublishError> {
        let tag = version.tag();
        if let Some(existing) = self.host.find_release(&tag).await? {
            return Ok(existing);
        }

        let record = ReleaseRecord::new(&tag, &self.title, &self.placeholder_body, version.is_prerelease());
        match self.host.create_release(&record).await {
            Ok(created) => {
                info!("Created release {}", tag);
                Ok(created)
            }
            Err(CapabilityError::AlreadyExists(_)) => {
                debug!("Release {} created concurrently, re-reading", tag);
                self.host
                    .find_release(&tag)
                    .await?
                    .ok_or(PublishError::Vanished(tag))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach an artifact, replacing a same-named asset
    pub async fn attach(
        &self,
        version: &ReleaseVersion,
        artifact: &BuildArtifact,
    ) -> Result<(), PublishError> {
        if &artifact.version != version {
            return Err(PublishError::VersionMismatch {
                name: artifact.name.clone(),
                artifact: artifact.version.to_string(),
                release: version.to_string(),
            });
        }

        let record = self.ensure_record(version).await?;
        self.host.upload_asset(&record.tag, artifact).await?;
        info!("Attached {} ({}) to {}", artifact.name, artifact.platform, record.tag);
        Ok(())
    }

    /// Replace the record body
    pub async fn update_body(
        &self,
        version: &ReleaseVersion,
        body: &str,
    ) -> Result<ReleaseRecord, PublishError> {
        let record = self.ensure_record(version).await?;
        Ok(self.host.update_body(&record.tag, body).await?)
    }
}

/// Attaches each finished job's artifacts right away
pub struct ReleaseSink {
    publisher: Arc<ReleasePublisher>,
    version: ReleaseVersion,
}

impl ReleaseSink {
    pub fn new(publisher: Arc<ReleasePublisher>, version: ReleaseVersion) -> Self {
        Self { publisher, version }
    }
}

#[async_trait]
impl JobSink for ReleaseSink {
    async fn accept(&self, output: &JobOutput) -> Result<(), JobError> {
        for artifact in &output.artifacts {
            self.publisher.attach(&self.version, artifact).await?;
        }
        Ok(())
    }
}
