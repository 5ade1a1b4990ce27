//! Builds that run the configured command for each platform

use crate::capability::system::run_tool;
use crate::capability::{BuildJob, BuildOutput, Builder, CapabilityError};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;

fn digest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"sha256:[0-9a-f]{64}").expect("valid digest regex"))
}

/// Last `sha256:<hex>` reference in a block of output
pub fn find_digest(output: &str) -> Option<String> {
    digest_pattern()
        .find_iter(output)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Runs build commands from the repository root
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    root: PathBuf,
}

impl CommandBuilder {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, job: &BuildJob) -> Result<BuildOutput, CapabilityError> {
        let mut env = job.env.clone();
        env.insert("RELEASE_VERSION".to_string(), job.version.to_string());
        env.insert("TARGET_PLATFORM".to_string(), job.platform.to_string());

        info!("Building {} for {}", job.version, job.platform);
        let stdout = run_tool(&job.command, &job.args, &self.root, &env, job.timeout_secs).await?;

        let mut artifacts = Vec::with_capacity(job.artifacts.len());
        for artifact in &job.artifacts {
            let path = self.root.join(artifact);
            if !tokio::fs::try_exists(&path).await? {
                return Err(CapabilityError::NotFound(format!(
                    "artifact {} for {}",
                    artifact.display(),
                    job.platform
                )));
            }
            artifacts.push(artifact.clone());
        }

        let digest = match &job.digest_file {
            Some(file) => {
                // Either a bare digest or tool metadata mentioning one
                let content = tokio::fs::read_to_string(self.root.join(file)).await?;
                find_digest(&content).or_else(|| {
                    let trimmed = content.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
            }
            None => find_digest(&stdout),
        };

        if job.expects_digest && digest.is_none() {
            return Err(CapabilityError::InvalidOutput(format!(
                "build for {} reported no image digest",
                job.platform
            )));
        }

        Ok(BuildOutput { artifacts, digest })
    }
}
