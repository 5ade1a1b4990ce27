//! Release hosting and pipeline dispatch through the GitHub CLI

use crate::capability::system::run_tool;
use crate::capability::{CapabilityConfig, CapabilityError, Dispatcher, ReleaseHost};
use crate::core::{BuildArtifact, ReleaseAsset, ReleaseRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// `gh` CLI client
#[derive(Debug, Clone)]
pub struct GhCli {
    gh_path: String,
    root: PathBuf,
    repository: Option<String>,
    staging_dir: PathBuf,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRelease {
    tag_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    is_prerelease: bool,
    #[serde(default)]
    assets: Vec<GhAsset>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    name: String,
}

impl From<GhRelease> for ReleaseRecord {
    fn from(release: GhRelease) -> Self {
        let mut record = ReleaseRecord::new(
            &release.tag_name,
            &release.name,
            &release.body,
            release.is_prerelease,
        );
        for asset in release.assets {
            record.assets.insert(
                asset.name.clone(),
                ReleaseAsset {
                    name: asset.name,
                    platform: None,
                },
            );
        }
        record
    }
}

impl GhCli {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            gh_path: config.gh_path.clone(),
            root: config.root.clone(),
            repository: config.repository.clone(),
            staging_dir: config.artifact_dir.join("release-assets"),
            timeout_secs: config.timeout_secs,
        }
    }

    async fn gh(&self, mut arguments: Vec<String>) -> Result<String, CapabilityError> {
        if let Some(repo) = &self.repository {
            arguments.push("--repo".to_string());
            arguments.push(repo.clone());
        }
        run_tool(&self.gh_path, &arguments, &self.root, &HashMap::new(), self.timeout_secs).await
    }

    fn repository(&self) -> Result<&str, CapabilityError> {
        self.repository
            .as_deref()
            .ok_or_else(|| CapabilityError::Internal("no repository configured for gh".to_string()))
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.to_lowercase().contains("not found")
}

#[async_trait]
impl ReleaseHost for GhCli {
    async fn find_release(&self, tag: &str) -> Result<Option<ReleaseRecord>, CapabilityError> {
        let result = self
            .gh(vec![
                "release".into(),
                "view".into(),
                tag.into(),
                "--json".into(),
                "tagName,name,body,isPrerelease,assets".into(),
            ])
            .await;

        match result {
            Ok(json) => {
                let release: GhRelease = serde_json::from_str(&json)
                    .map_err(|e| CapabilityError::InvalidOutput(format!("gh release view: {}", e)))?;
                Ok(Some(release.into()))
            }
            Err(CapabilityError::Command { stderr, .. }) if is_not_found(&stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_release(&self, record: &ReleaseRecord) -> Result<ReleaseRecord, CapabilityError> {
        let mut arguments = vec![
            "release".to_string(),
            "create".to_string(),
            record.tag.clone(),
            "--title".to_string(),
            record.title.clone(),
            "--notes".to_string(),
            record.body.clone(),
        ];
        if record.prerelease {
            arguments.push("--prerelease".to_string());
        }

        match self.gh(arguments).await {
            Ok(_) => Ok(record.clone()),
            Err(CapabilityError::Command { stderr, .. }) if stderr.contains("already exists") => {
                Err(CapabilityError::AlreadyExists(format!("release {}", record.tag)))
            }
            Err(e) => Err(e),
        }
    }

    async fn upload_asset(&self, tag: &str, asset: &BuildArtifact) -> Result<(), CapabilityError> {
        // gh names assets after the file, so stage a copy under the published name
        let staged = self.staging_dir.join(&asset.name);
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::copy(self.root.join(&asset.path), &staged).await?;
        debug!("Uploading {} to release {}", asset.name, tag);

        self.gh(vec![
            "release".into(),
            "upload".into(),
            tag.into(),
            staged.to_string_lossy().into_owned(),
            "--clobber".into(),
        ])
        .await?;
        Ok(())
    }

    async fn update_body(&self, tag: &str, body: &str) -> Result<ReleaseRecord, CapabilityError> {
        self.gh(vec![
            "release".into(),
            "edit".into(),
            tag.into(),
            "--notes".into(),
            body.into(),
        ])
        .await?;

        self.find_release(tag)
            .await?
            .ok_or_else(|| CapabilityError::NotFound(format!("release {}", tag)))
    }
}

/// `-f client_payload[key]=value` arguments for a flat JSON object
fn payload_fields(payload: &serde_json::Value) -> Vec<String> {
    let mut fields = Vec::new();
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            fields.push("-f".to_string());
            fields.push(format!("client_payload[{}]={}", key, value));
        }
    }
    fields
}

#[async_trait]
impl Dispatcher for GhCli {
    async fn dispatch(
        &self,
        repository: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CapabilityError> {
        let repository = if repository.is_empty() {
            self.repository()?
        } else {
            repository
        };

        let mut arguments = vec![
            "api".to_string(),
            format!("repos/{}/dispatches", repository),
            "--method".to_string(),
            "POST".to_string(),
            "-f".to_string(),
            format!("event_type={}", event_type),
        ];
        arguments.extend(payload_fields(payload));

        // `gh api` takes the repository from the path, not from --repo
        run_tool(&self.gh_path, &arguments, &self.root, &HashMap::new(), self.timeout_secs).await?;
        Ok(())
    }
}
