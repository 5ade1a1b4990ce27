//! Source control through the git CLI

use crate::capability::system::{args, run_tool};
use crate::capability::{CapabilityConfig, CapabilityError, CommitInfo, CommitRequest, SourceControl};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Field separator in `git log` output
const FIELD_SEP: char = '\u{1f}';

/// git CLI client rooted at the repository
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
    root: PathBuf,
    timeout_secs: u64,
}

impl GitCli {
    pub fn new(config: &CapabilityConfig) -> Self {
        Self {
            git_path: config.git_path.clone(),
            root: config.root.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    async fn git(&self, arguments: Vec<String>) -> Result<String, CapabilityError> {
        run_tool(&self.git_path, &arguments, &self.root, &HashMap::new(), self.timeout_secs).await
    }

    async fn push(&self, branch: Option<&str>) -> Result<(), CapabilityError> {
        let refspec = match branch {
            Some(branch) => format!("HEAD:{}", branch),
            None => "HEAD".to_string(),
        };
        self.git(vec!["push".into(), "origin".into(), refspec]).await?;
        Ok(())
    }
}

/// Repository-relative path in git's separator convention
fn git_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Parse `git log --format=%H<US>%s` output
fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .lines()
        .filter_map(|line| {
            let (sha, subject) = line.split_once(FIELD_SEP)?;
            Some(CommitInfo {
                sha: sha.trim().to_string(),
                subject: subject.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl SourceControl for GitCli {
    async fn read_committed(&self, path: &Path) -> Result<Option<String>, CapabilityError> {
        let object = format!("HEAD:{}", git_path(path));

        match self.git(vec!["cat-file".into(), "-e".into(), object.clone()]).await {
            Ok(_) => {}
            Err(CapabilityError::Command { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }

        self.git(vec!["show".into(), object]).await.map(Some)
    }

    async fn commit_and_push(&self, request: &CommitRequest) -> Result<String, CapabilityError> {
        let mut add = args(["add", "--"]);
        add.extend(request.files.iter().map(|(path, _)| git_path(path)));
        self.git(add).await?;

        self.git(vec![
            "-c".into(),
            format!("user.name={}", request.author_name),
            "-c".into(),
            format!("user.email={}", request.author_email),
            "commit".into(),
            "-m".into(),
            request.message.clone(),
        ])
        .await?;

        let sha = self.head_sha().await?;
        info!("Created version commit {}", sha);

        if request.push {
            if let Err(e) = self.push(request.branch.as_deref()).await {
                // Another run may have pushed first; replay on top of it once.
                warn!("Push rejected ({}), rebasing onto remote", e);
                let mut pull = args(["pull", "--rebase", "origin"]);
                if let Some(branch) = &request.branch {
                    pull.push(branch.clone());
                }
                self.git(pull).await?;
                self.push(request.branch.as_deref()).await?;
                return self.head_sha().await;
            }
        }

        Ok(sha)
    }

    async fn list_tags(&self) -> Result<Vec<String>, CapabilityError> {
        let output = self.git(args(["tag", "--list"])).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn commits_between(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<CommitInfo>, CapabilityError> {
        let to = to.unwrap_or("HEAD");
        let range = match from {
            Some(from) => format!("{}..{}", from, to),
            None => to.to_string(),
        };
        let output = self
            .git(vec![
                "log".into(),
                "--reverse".into(),
                format!("--format=%H{}%s", FIELD_SEP),
                range,
            ])
            .await?;
        Ok(parse_log(&output))
    }

    async fn head_sha(&self) -> Result<String, CapabilityError> {
        Ok(self.git(args(["rev-parse", "HEAD"])).await?.trim().to_string())
    }
}
