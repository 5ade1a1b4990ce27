//! Release version resolution from trigger context

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Version used when no trigger field yields a usable value
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Canonical release version for one pipeline run.
///
/// Always non-empty and never carries a tag prefix (`v`, `refs/tags/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    /// Normalize a raw version-like value, returning `None` when it is blank
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("refs/tags/").unwrap_or(trimmed);
        let normalized = strip_tag_prefix(trimmed).trim();

        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag name of the release record for this version
    pub fn tag(&self) -> String {
        format!("v{}", self.0)
    }

    /// Whether the version carries a hyphen-delimited pre-release suffix
    pub fn is_prerelease(&self) -> bool {
        self.0.contains('-')
    }

    /// Version accepted by Windows installer metadata: everything from the
    /// first hyphen onward is dropped.
    pub fn windows_compatible(&self) -> ReleaseVersion {
        match self.0.split_once('-') {
            Some((head, _)) if !head.is_empty() => ReleaseVersion(head.to_string()),
            _ => self.clone(),
        }
    }

    /// Parse as semver, if the version is semver-shaped
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.0).ok()
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a single leading `v`/`V` when it precedes a digit
fn strip_tag_prefix(value: &str) -> &str {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some('v' | 'V'), Some(c)) if c.is_ascii_digit() => &value[1..],
        _ => value,
    }
}

/// Inputs of a manual dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchInputs {
    /// Requested version
    #[serde(default)]
    pub version: Option<String>,

    /// Whether to trigger the sibling pipeline
    #[serde(default)]
    pub trigger_sibling: bool,

    /// Whether the published images get the "latest" designation
    #[serde(default)]
    pub set_latest: bool,
}

/// Payload of a cross-pipeline dispatch event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub sha: Option<String>,
}

impl DispatchPayload {
    /// Parse a JSON client payload
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// What started the pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerContext {
    /// A pushed git tag
    TagPush { git_ref: String },

    /// A manual run with explicit inputs
    ManualDispatch {
        #[serde(default)]
        inputs: DispatchInputs,
        #[serde(default)]
        git_ref: Option<String>,
    },

    /// A dispatch sent by an upstream pipeline
    UpstreamDispatch {
        #[serde(default)]
        payload: DispatchPayload,
        #[serde(default)]
        git_ref: Option<String>,
    },
}

impl TriggerContext {
    fn git_ref(&self) -> Option<&str> {
        match self {
            TriggerContext::TagPush { git_ref } => Some(git_ref.as_str()),
            TriggerContext::ManualDispatch { git_ref, .. }
            | TriggerContext::UpstreamDispatch { git_ref, .. } => git_ref.as_deref(),
        }
    }

    /// Commit sha carried by an upstream payload
    pub fn sha(&self) -> Option<&str> {
        match self {
            TriggerContext::UpstreamDispatch { payload, .. } => payload.sha.as_deref(),
            _ => None,
        }
    }
}

/// Which trigger field produced the version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    ManualInput,
    PayloadVersion,
    PayloadTag,
    GitTag,
    Default,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionSource::ManualInput => "manual input",
            VersionSource::PayloadVersion => "dispatch payload version",
            VersionSource::PayloadTag => "dispatch payload tag",
            VersionSource::GitTag => "git tag",
            VersionSource::Default => "default",
        };
        f.write_str(name)
    }
}

/// Result of resolving a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub version: ReleaseVersion,
    pub source: VersionSource,
    /// Images get the "latest" tag
    pub set_latest: bool,
    /// The sibling pipeline should be triggered
    pub trigger_sibling: bool,
}

/// Derives the canonical version from a trigger
#[derive(Debug, Clone)]
pub struct VersionResolver {
    default: ReleaseVersion,
    latest_on_tag: bool,
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self {
            default: ReleaseVersion(DEFAULT_VERSION.to_string()),
            latest_on_tag: true,
        }
    }
}

impl VersionResolver {
    pub fn new(default: &str, latest_on_tag: bool) -> Self {
        let default = ReleaseVersion::parse(default)
            .unwrap_or_else(|| ReleaseVersion(DEFAULT_VERSION.to_string()));
        Self {
            default,
            latest_on_tag,
        }
    }

    /// Resolve the version. Never fails: an empty resolution falls through
    /// to the default.
    pub fn resolve(&self, trigger: &TriggerContext) -> Resolution {
        let (version, source) = self.pick(trigger);
        debug!("Resolved version {} from {}", version, source);

        let (set_latest, trigger_sibling) = match trigger {
            TriggerContext::ManualDispatch { inputs, .. } => {
                (inputs.set_latest, inputs.trigger_sibling)
            }
            _ => (self.latest_on_tag && !version.is_prerelease(), false),
        };

        Resolution {
            version,
            source,
            set_latest,
            trigger_sibling,
        }
    }

    fn pick(&self, trigger: &TriggerContext) -> (ReleaseVersion, VersionSource) {
        let mut candidates: Vec<(Option<&str>, VersionSource)> = Vec::new();

        match trigger {
            TriggerContext::ManualDispatch { inputs, .. } => {
                candidates.push((inputs.version.as_deref(), VersionSource::ManualInput));
            }
            TriggerContext::UpstreamDispatch { payload, .. } => {
                candidates.push((payload.version.as_deref(), VersionSource::PayloadVersion));
                candidates.push((payload.tag.as_deref(), VersionSource::PayloadTag));
            }
            TriggerContext::TagPush { .. } => {}
        }
        candidates.push((trigger.git_ref().and_then(tag_from_ref), VersionSource::GitTag));

        candidates
            .into_iter()
            .find_map(|(raw, source)| raw.and_then(ReleaseVersion::parse).map(|v| (v, source)))
            .unwrap_or_else(|| (self.default.clone(), VersionSource::Default))
    }
}

/// Extract a tag name from a git ref. Branch refs yield nothing; bare names
/// only count when they look like a version.
fn tag_from_ref(git_ref: &str) -> Option<&str> {
    let git_ref = git_ref.trim();
    if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
        return Some(tag);
    }
    if git_ref.starts_with("refs/") {
        return None;
    }
    let bare = strip_tag_prefix(git_ref);
    if bare.starts_with(|c: char| c.is_ascii_digit()) {
        Some(git_ref)
    } else {
        None
    }
}
