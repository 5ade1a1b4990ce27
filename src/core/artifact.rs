//! Build outputs: platform artifacts, image digests, manifest lists and
//! release records

use crate::core::version::ReleaseVersion;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Target platform identifier, e.g. `linux/amd64`, `macos-arm64`, `android`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

impl Platform {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form usable in file and artifact names (`linux/amd64` -> `linux-amd64`)
    pub fn slug(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A platform-specific installer or package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub platform: Platform,
    pub version: ReleaseVersion,
    /// Name under which the artifact is published
    pub name: String,
    /// Local file produced by the build
    pub path: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid image digest '{value}': {reason}")]
pub struct DigestError {
    pub value: String,
    pub reason: &'static str,
}

/// Content hash of one architecture's image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDigest {
    pub platform: Platform,
    pub version: ReleaseVersion,
    digest: String,
}

impl ImageDigest {
    /// Accepts `sha256:<hex>` or the bare 64-char hex form
    pub fn new(
        platform: Platform,
        version: ReleaseVersion,
        value: &str,
    ) -> Result<Self, DigestError> {
        let value = value.trim();
        let hex_part = value.strip_prefix("sha256:").unwrap_or(value);

        if hex_part.len() != 64 {
            return Err(DigestError {
                value: value.to_string(),
                reason: "expected 64 hex characters",
            });
        }
        if !hex_part.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(DigestError {
                value: value.to_string(),
                reason: "expected lowercase hex",
            });
        }

        Ok(Self {
            platform,
            version,
            digest: format!("sha256:{}", hex_part),
        })
    }

    /// `sha256:<hex>`
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// One per-architecture entry of a manifest list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub platform: Platform,
    pub digest: String,
}

/// Multi-architecture manifest list published under shared tags.
///
/// Entries are kept sorted by platform and tags sorted and deduplicated, so
/// the same inputs always serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestList {
    pub repository: String,
    pub tags: Vec<String>,
    pub manifests: Vec<ManifestEntry>,
}

impl ManifestList {
    pub fn new<I, S>(repository: &str, tags: I, digests: &[ImageDigest]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        let manifests: BTreeSet<ManifestEntry> = digests
            .iter()
            .map(|d| ManifestEntry {
                platform: d.platform.clone(),
                digest: d.digest().to_string(),
            })
            .collect();

        Self {
            repository: repository.to_string(),
            tags: tags.into_iter().collect(),
            manifests: manifests.into_iter().collect(),
        }
    }

    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// sha256 of the canonical JSON form
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let canonical = self.to_canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// `repository@digest` source references
    pub fn sources(&self) -> Vec<String> {
        self.manifests
            .iter()
            .map(|m| format!("{}@{}", self.repository, m.digest))
            .collect()
    }

    /// Tag -> referenced digests
    pub fn tag_mapping(&self) -> BTreeMap<String, Vec<String>> {
        self.tags
            .iter()
            .map(|tag| {
                let digests = self.manifests.iter().map(|m| m.digest.clone()).collect();
                (tag.clone(), digests)
            })
            .collect()
    }
}

/// An asset attached to a release record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    /// Known when the asset was attached by this tool
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl From<&BuildArtifact> for ReleaseAsset {
    fn from(artifact: &BuildArtifact) -> Self {
        Self {
            name: artifact.name.clone(),
            platform: Some(artifact.platform.clone()),
        }
    }
}

/// Published release, keyed by its tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub tag: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub prerelease: bool,
    /// Attached assets keyed by published name
    #[serde(default)]
    pub assets: BTreeMap<String, ReleaseAsset>,
}

impl ReleaseRecord {
    pub fn new(tag: &str, title: &str, body: &str, prerelease: bool) -> Self {
        Self {
            tag: tag.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            prerelease,
            assets: BTreeMap::new(),
        }
    }

    pub fn asset_names(&self) -> Vec<&str> {
        self.assets.keys().map(String::as_str).collect()
    }
}
