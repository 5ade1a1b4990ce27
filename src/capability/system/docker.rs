//! Manifest-list publication through `docker buildx imagetools`

use crate::capability::system::run_tool;
use crate::capability::{CapabilityConfig, CapabilityError, Registry};
use crate::core::ManifestList;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct BuildxRegistry {
    docker_path: String,
    root: PathBuf,
    timeout_secs: u64,
    source_host: String,
}

impl BuildxRegistry {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            docker_path: config.docker_path.clone(),
            root: config.root.clone(),
            timeout_secs: config.timeout_secs,
            source_host: config.image_source_host.clone(),
        }
    }

    async fn docker(&self, arguments: Vec<String>) -> Result<String, CapabilityError> {
        run_tool(&self.docker_path, &arguments, &self.root, &HashMap::new(), self.timeout_secs).await
    }
}

/// Arguments for `imagetools create` against one registry host.
///
/// The per-architecture images exist only on `source_host`; imagetools copies
/// them to `host` while creating the list there.
fn create_args(host: &str, source_host: &str, list: &ManifestList) -> Vec<String> {
    let mut arguments = vec![
        "buildx".to_string(),
        "imagetools".to_string(),
        "create".to_string(),
    ];
    for tag in &list.tags {
        arguments.push("-t".to_string());
        arguments.push(format!("{}/{}:{}", host, list.repository, tag));
    }
    for source in list.sources() {
        arguments.push(format!("{}/{}", source_host, source));
    }
    arguments
}

#[async_trait]
impl Registry for BuildxRegistry {
    async fn push_manifest_list(
        &self,
        host: &str,
        list: &ManifestList,
    ) -> Result<String, CapabilityError> {
        let first_tag = list
            .tags
            .first()
            .ok_or_else(|| CapabilityError::Internal("manifest list has no tags".to_string()))?;

        self.docker(create_args(host, &self.source_host, list)).await?;

        let reference = format!("{}/{}:{}", host, list.repository, first_tag);
        let digest = self
            .docker(vec![
                "buildx".into(),
                "imagetools".into(),
                "inspect".into(),
                reference.clone(),
                "--format".into(),
                "{{.Manifest.Digest}}".into(),
            ])
            .await?
            .trim()
            .to_string();

        if digest.is_empty() {
            return Err(CapabilityError::InvalidOutput(format!(
                "no digest reported for {}",
                reference
            )));
        }

        info!("Published {} as {}", reference, digest);
        Ok(digest)
    }
}
