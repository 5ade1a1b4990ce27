//! Version propagation into JSON manifests behind a commit guard

use crate::capability::{CapabilityError, CommitRequest, SourceControl};
use crate::core::config::{CommitConfig, ManifestConfig, PackagingTarget};
use crate::core::ReleaseVersion;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot set '{field}' in {path}: {reason}")]
    Field {
        path: PathBuf,
        field: String,
        reason: String,
    },

    #[error("Version commit failed: {0}")]
    Commit(#[from] CapabilityError),
}

/// Result of the commit guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// Every committed manifest already matched HEAD
    Unchanged,
    Committed { sha: String, files: Vec<PathBuf> },
}

/// One rewritten manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestUpdate {
    pub path: PathBuf,
    /// Version written to this manifest
    pub version: ReleaseVersion,
    /// Whether the working-tree file changed
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub updates: Vec<ManifestUpdate>,
    pub outcome: PropagationOutcome,
}

/// Version written for a packaging target.
///
/// Windows installers only accept numeric dotted versions, so the
/// pre-release suffix is dropped there.
pub fn version_for_target(version: &ReleaseVersion, target: Option<PackagingTarget>) -> ReleaseVersion {
    match target {
        Some(PackagingTarget::Windows) => version.windows_compatible(),
        _ => version.clone(),
    }
}

/// Set the dotted `field` of a JSON document to `version`, keeping key order.
///
/// Returns the input unchanged when the field already holds `version`.
pub fn apply_version(content: &str, field: &str, version: &str) -> Result<String, FieldError> {
    let mut document: Value = serde_json::from_str(content).map_err(FieldError::Parse)?;

    let mut segments: Vec<&str> = field.split('.').collect();
    let leaf = segments
        .pop()
        .filter(|leaf| !leaf.is_empty())
        .ok_or_else(|| FieldError::Path("empty field path".to_string()))?;

    let mut node = &mut document;
    for segment in segments {
        node = node
            .get_mut(segment)
            .ok_or_else(|| FieldError::Path(format!("missing object '{}'", segment)))?;
    }

    let object = node
        .as_object_mut()
        .ok_or_else(|| FieldError::Path("parent is not an object".to_string()))?;

    if object.get(leaf).and_then(Value::as_str) == Some(version) {
        return Ok(content.to_string());
    }
    object.insert(leaf.to_string(), Value::String(version.to_string()));

    let mut rendered = serde_json::to_string_pretty(&document).map_err(FieldError::Parse)?;
    if content.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

/// Failure of [`apply_version`], before a path is attached
#[derive(Debug, Error)]
pub enum FieldError {
    #[error(transparent)]
    Parse(serde_json::Error),
    #[error("{0}")]
    Path(String),
}

/// Writes the release version into manifests and commits the change once
pub struct VersionPropagator {
    root: PathBuf,
    source_control: Arc<dyn SourceControl>,
    marker: String,
    write: bool,
}

impl VersionPropagator {
    pub fn new(root: impl Into<PathBuf>, source_control: Arc<dyn SourceControl>, marker: &str) -> Self {
        Self {
            root: root.into(),
            source_control,
            marker: marker.to_string(),
            write: true,
        }
    }

    /// Leave the working tree untouched (dry runs)
    pub fn without_writes(mut self) -> Self {
        self.write = false;
        self
    }

    async fn read(&self, path: &Path) -> Result<String, PropagationError> {
        tokio::fs::read_to_string(self.root.join(path))
            .await
            .map_err(|source| PropagationError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Rewrite every manifest, then commit the committed ones that differ
    /// from HEAD. `commit.message` must already be rendered.
    pub async fn propagate(
        &self,
        version: &ReleaseVersion,
        manifests: &[ManifestConfig],
        commit: &CommitConfig,
    ) -> Result<PropagationReport, PropagationError> {
        let mut updates = Vec::with_capacity(manifests.len());
        let mut to_commit = Vec::new();

        for manifest in manifests {
            let target_version = version_for_target(version, manifest.target);
            let current = self.read(&manifest.path).await?;
            let updated = apply_version(&current, &manifest.field, target_version.as_str())
                .map_err(|e| match e {
                    FieldError::Parse(source) => PropagationError::Parse {
                        path: manifest.path.clone(),
                        source,
                    },
                    FieldError::Path(reason) => PropagationError::Field {
                        path: manifest.path.clone(),
                        field: manifest.field.clone(),
                        reason,
                    },
                })?;

            let changed = updated != current;
            if changed && self.write {
                tokio::fs::write(self.root.join(&manifest.path), &updated)
                    .await
                    .map_err(|source| PropagationError::Io {
                        path: manifest.path.clone(),
                        source,
                    })?;
            }
            debug!(
                "{} -> {} ({})",
                manifest.path.display(),
                target_version,
                if changed { "updated" } else { "already current" }
            );

            if manifest.commit {
                let committed = self.source_control.read_committed(&manifest.path).await?;
                if committed.as_deref() != Some(updated.as_str()) {
                    to_commit.push((manifest.path.clone(), updated));
                }
            }

            updates.push(ManifestUpdate {
                path: manifest.path.clone(),
                version: target_version,
                changed,
            });
        }

        if to_commit.is_empty() {
            info!("Manifests already at {}, nothing to commit", version);
            return Ok(PropagationReport {
                updates,
                outcome: PropagationOutcome::Unchanged,
            });
        }

        let files: Vec<PathBuf> = to_commit.iter().map(|(path, _)| path.clone()).collect();
        let request = CommitRequest {
            files: to_commit,
            message: self.marked(&commit.message),
            author_name: commit.author_name.clone(),
            author_email: commit.author_email.clone(),
            branch: commit.branch.clone(),
            push: commit.push,
        };
        let sha = self.source_control.commit_and_push(&request).await?;
        info!("Committed version {} to {} file(s) as {}", version, files.len(), sha);

        Ok(PropagationReport {
            updates,
            outcome: PropagationOutcome::Committed { sha, files },
        })
    }

    /// Commit message carrying the machine-authorship marker
    fn marked(&self, message: &str) -> String {
        if self.marker.is_empty() || message.contains(&self.marker) {
            message.to_string()
        } else {
            format!("{} {}", message.trim_end(), self.marker)
        }
    }
}
