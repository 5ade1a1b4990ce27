//! In-process capabilities
//!
//! State lives behind mutexes so tests can inspect what a run did, and the
//! CLI uses the same types for `--dry-run`.

use crate::capability::{
    ArtifactStore, BuildJob, BuildOutput, Builder, Capabilities, CapabilityError, CommitInfo,
    CommitRequest, Dispatcher, Registry, ReleaseHost, SourceControl,
};
use crate::core::{BuildArtifact, ManifestList, Platform, ReleaseAsset, ReleaseRecord};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A commit recorded by [`MemorySourceControl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub sha: String,
    pub message: String,
    pub files: Vec<PathBuf>,
    pub pushed: bool,
}

#[derive(Debug, Default)]
struct SourceState {
    files: HashMap<PathBuf, String>,
    commits: Vec<RecordedCommit>,
    /// Tag name -> number of commits reachable from it
    tags: BTreeMap<String, usize>,
}

/// Linear history with a committed file tree
#[derive(Debug, Default)]
pub struct MemorySourceControl {
    state: Mutex<SourceState>,
}

fn fake_sha(seed: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", index, seed).as_bytes());
    hex::encode(hasher.finalize())[..40].to_string()
}

impl MemorySourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the committed content of a file without adding history
    pub fn set_committed(&self, path: impl Into<PathBuf>, content: &str) {
        lock(&self.state).files.insert(path.into(), content.to_string());
    }

    /// Append a commit with the given subject
    pub fn add_commit(&self, subject: &str) -> String {
        let mut state = lock(&self.state);
        let sha = fake_sha(subject, state.commits.len());
        state.commits.push(RecordedCommit {
            sha: sha.clone(),
            message: subject.to_string(),
            files: Vec::new(),
            pushed: true,
        });
        sha
    }

    /// Tag the current HEAD
    pub fn tag(&self, name: &str) {
        let mut state = lock(&self.state);
        let head = state.commits.len();
        state.tags.insert(name.to_string(), head);
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        lock(&self.state).commits.clone()
    }

    pub fn committed(&self, path: &Path) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    fn resolve(state: &SourceState, reference: &str) -> Result<usize, CapabilityError> {
        if reference == "HEAD" {
            return Ok(state.commits.len());
        }
        if let Some(count) = state.tags.get(reference) {
            return Ok(*count);
        }
        state
            .commits
            .iter()
            .position(|c| c.sha == reference)
            .map(|i| i + 1)
            .ok_or_else(|| CapabilityError::NotFound(format!("revision {}", reference)))
    }
}

#[async_trait]
impl SourceControl for MemorySourceControl {
    async fn read_committed(&self, path: &Path) -> Result<Option<String>, CapabilityError> {
        Ok(self.committed(path))
    }

    async fn commit_and_push(&self, request: &CommitRequest) -> Result<String, CapabilityError> {
        let mut state = lock(&self.state);
        for (path, content) in &request.files {
            state.files.insert(path.clone(), content.clone());
        }
        let sha = fake_sha(&request.message, state.commits.len());
        state.commits.push(RecordedCommit {
            sha: sha.clone(),
            message: request.message.clone(),
            files: request.files.iter().map(|(p, _)| p.clone()).collect(),
            pushed: request.push,
        });
        Ok(sha)
    }

    async fn list_tags(&self) -> Result<Vec<String>, CapabilityError> {
        Ok(lock(&self.state).tags.keys().cloned().collect())
    }

    async fn commits_between(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<CommitInfo>, CapabilityError> {
        let state = lock(&self.state);
        let end = Self::resolve(&state, to.unwrap_or("HEAD"))?;
        let start = match from {
            Some(from) => Self::resolve(&state, from)?,
            None => 0,
        };
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(state.commits[start..end]
            .iter()
            .map(|c| CommitInfo {
                sha: c.sha.clone(),
                subject: c.message.lines().next().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn head_sha(&self) -> Result<String, CapabilityError> {
        lock(&self.state)
            .commits
            .last()
            .map(|c| c.sha.clone())
            .ok_or_else(|| CapabilityError::NotFound("HEAD".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn names(&self) -> Vec<String> {
        lock(&self.items).keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload(&self, name: &str, content: &str) -> Result<(), CapabilityError> {
        let mut items = lock(&self.items);
        if items.contains_key(name) {
            return Err(CapabilityError::AlreadyExists(format!("artifact {}", name)));
        }
        items.insert(name.to_string(), content.to_string());
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<String>, CapabilityError> {
        Ok(lock(&self.items).get(name).cloned())
    }
}

/// Records every manifest list pushed, per host
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    pushes: Mutex<Vec<(String, ManifestList)>>,
    failing_hosts: Mutex<HashSet<String>>,
}

impl MemoryRegistry {
    pub fn pushes(&self) -> Vec<(String, ManifestList)> {
        lock(&self.pushes).clone()
    }

    pub fn fail_host(&self, host: &str) {
        lock(&self.failing_hosts).insert(host.to_string());
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn push_manifest_list(
        &self,
        host: &str,
        list: &ManifestList,
    ) -> Result<String, CapabilityError> {
        if lock(&self.failing_hosts).contains(host) {
            return Err(CapabilityError::Command {
                command: "push".to_string(),
                code: 1,
                stderr: format!("{} rejected the push", host),
            });
        }
        let digest = list
            .digest()
            .map_err(|e| CapabilityError::Internal(e.to_string()))?;
        lock(&self.pushes).push((host.to_string(), list.clone()));
        Ok(digest)
    }
}

#[derive(Debug, Default)]
pub struct MemoryReleaseHost {
    records: Mutex<BTreeMap<String, ReleaseRecord>>,
    uploads: Mutex<usize>,
}

impl MemoryReleaseHost {
    pub fn record(&self, tag: &str) -> Option<ReleaseRecord> {
        lock(&self.records).get(tag).cloned()
    }

    pub fn records(&self) -> Vec<ReleaseRecord> {
        lock(&self.records).values().cloned().collect()
    }

    /// Number of asset uploads, replacements included
    pub fn upload_count(&self) -> usize {
        *lock(&self.uploads)
    }

    pub fn insert(&self, record: ReleaseRecord) {
        lock(&self.records).insert(record.tag.clone(), record);
    }
}

#[async_trait]
impl ReleaseHost for MemoryReleaseHost {
    async fn find_release(&self, tag: &str) -> Result<Option<ReleaseRecord>, CapabilityError> {
        Ok(self.record(tag))
    }

    async fn create_release(&self, record: &ReleaseRecord) -> Result<ReleaseRecord, CapabilityError> {
        let mut records = lock(&self.records);
        if records.contains_key(&record.tag) {
            return Err(CapabilityError::AlreadyExists(format!("release {}", record.tag)));
        }
        records.insert(record.tag.clone(), record.clone());
        Ok(record.clone())
    }

    async fn upload_asset(&self, tag: &str, asset: &BuildArtifact) -> Result<(), CapabilityError> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(tag)
            .ok_or_else(|| CapabilityError::NotFound(format!("release {}", tag)))?;
        record.assets.insert(asset.name.clone(), ReleaseAsset::from(asset));
        *lock(&self.uploads) += 1;
        Ok(())
    }

    async fn update_body(&self, tag: &str, body: &str) -> Result<ReleaseRecord, CapabilityError> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(tag)
            .ok_or_else(|| CapabilityError::NotFound(format!("release {}", tag)))?;
        record.body = body.to_string();
        Ok(record.clone())
    }
}

/// Builder with per-platform scripted outcomes
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    failures: Mutex<HashMap<Platform, String>>,
    digests: Mutex<HashMap<Platform, String>>,
    delay: Mutex<Option<Duration>>,
    builds: Mutex<Vec<Platform>>,
}

impl ScriptedBuilder {
    /// Make builds for `platform` fail with `message`
    pub fn fail(&self, platform: &str, message: &str) {
        lock(&self.failures).insert(Platform::new(platform), message.to_string());
    }

    /// Let builds for `platform` succeed again
    pub fn recover(&self, platform: &str) {
        lock(&self.failures).remove(&Platform::new(platform));
    }

    /// Report `digest` for `platform` instead of the derived one
    pub fn set_digest(&self, platform: &str, digest: &str) {
        lock(&self.digests).insert(Platform::new(platform), digest.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Platforms built so far, in completion order
    pub fn builds(&self) -> Vec<Platform> {
        lock(&self.builds).clone()
    }

    /// Digest reported for a platform and version when none was scripted
    pub fn derived_digest(platform: &str, version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}@{}", platform, version).as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn build(&self, job: &BuildJob) -> Result<BuildOutput, CapabilityError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.failures).get(&job.platform).cloned();
        if let Some(message) = failure {
            return Err(CapabilityError::Command {
                command: job.command.clone(),
                code: 1,
                stderr: message,
            });
        }

        let digest = if job.expects_digest {
            let scripted = lock(&self.digests).get(&job.platform).cloned();
            Some(scripted.unwrap_or_else(|| {
                Self::derived_digest(job.platform.as_str(), job.version.as_str())
            }))
        } else {
            None
        };

        lock(&self.builds).push(job.platform.clone());
        Ok(BuildOutput {
            artifacts: job.artifacts.clone(),
            digest,
        })
    }
}

/// A dispatch recorded by [`MemoryDispatcher`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDispatch {
    pub repository: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct MemoryDispatcher {
    fail: Mutex<bool>,
    sent: Mutex<Vec<RecordedDispatch>>,
}

impl MemoryDispatcher {
    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn sent(&self) -> Vec<RecordedDispatch> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn dispatch(
        &self,
        repository: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), CapabilityError> {
        if *lock(&self.fail) {
            return Err(CapabilityError::Command {
                command: "dispatch".to_string(),
                code: 1,
                stderr: "Resource not accessible by integration".to_string(),
            });
        }
        lock(&self.sent).push(RecordedDispatch {
            repository: repository.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Concrete in-memory capabilities, kept typed for inspection
#[derive(Debug, Clone, Default)]
pub struct MemoryCapabilities {
    pub source_control: Arc<MemorySourceControl>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub registry: Arc<MemoryRegistry>,
    pub release_host: Arc<MemoryReleaseHost>,
    pub builder: Arc<ScriptedBuilder>,
    pub dispatcher: Arc<MemoryDispatcher>,
}

impl MemoryCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            source_control: self.source_control.clone(),
            artifacts: self.artifacts.clone(),
            registry: self.registry.clone(),
            release_host: self.release_host.clone(),
            builder: self.builder.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}
