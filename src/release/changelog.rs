//! Markdown changelog from tag history and conventional commits

use crate::capability::{CapabilityError, CommitInfo, SourceControl};
use crate::core::ReleaseVersion;
use regex::Regex;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("Cannot read history: {0}")]
    History(#[from] CapabilityError),
}

fn conventional_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<kind>[A-Za-z]+)(?:\((?P<scope>[^)]*)\))?(?P<breaking>!)?:\s*(?P<description>.+)$")
            .expect("valid conventional commit regex")
    })
}

/// Group a commit falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Feature,
    Fix,
    Other,
}

/// Classify a commit subject and format its changelog line
pub fn classify(commit: &CommitInfo) -> (ChangeKind, String) {
    let short_sha: String = commit.sha.chars().take(7).collect();

    let Some(caps) = conventional_pattern().captures(commit.subject.trim()) else {
        return (ChangeKind::Other, format!("{} ({})", commit.subject.trim(), short_sha));
    };

    let kind = match caps["kind"].to_ascii_lowercase().as_str() {
        "feat" | "feature" => ChangeKind::Feature,
        "fix" | "bugfix" => ChangeKind::Fix,
        _ => ChangeKind::Other,
    };

    let mut line = String::new();
    if caps.name("breaking").is_some() {
        line.push_str("**BREAKING** ");
    }
    if let Some(scope) = caps.name("scope").filter(|s| !s.as_str().is_empty()) {
        let _ = write!(line, "**{}:** ", scope.as_str());
    }
    let _ = write!(line, "{} ({})", &caps["description"], short_sha);
    (kind, line)
}

/// Changes of one release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogSection {
    pub tag: String,
    pub features: Vec<String>,
    pub fixes: Vec<String>,
    pub other: Vec<String>,
}

impl ChangelogSection {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    fn push(&mut self, commit: &CommitInfo) {
        let (kind, line) = classify(commit);
        match kind {
            ChangeKind::Feature => self.features.push(line),
            ChangeKind::Fix => self.fixes.push(line),
            ChangeKind::Other => self.other.push(line),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty() && self.fixes.is_empty() && self.other.is_empty()
    }
}

/// Sections newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog {
    pub sections: Vec<ChangelogSection>,
}

impl Changelog {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "## {}\n", section.tag);
            if section.is_empty() {
                out.push_str("_No notable changes._\n\n");
                continue;
            }
            for (heading, lines) in [
                ("Features", &section.features),
                ("Bug Fixes", &section.fixes),
                ("Other Changes", &section.other),
            ] {
                if lines.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "### {}\n", heading);
                for line in lines {
                    let _ = writeln!(out, "- {}", line);
                }
                out.push('\n');
            }
        }
        out.trim_end().to_string() + "\n"
    }
}

pub struct ChangelogGenerator {
    source_control: Arc<dyn SourceControl>,
    marker: String,
}

impl ChangelogGenerator {
    pub fn new(source_control: Arc<dyn SourceControl>, marker: &str) -> Self {
        Self {
            source_control,
            marker: marker.to_string(),
        }
    }

    /// Version tags up to and including `version`, oldest first.
    ///
    /// One tag per version; `v1.0.0` wins over a bare `1.0.0`.
    async fn version_tags(
        &self,
        version: &ReleaseVersion,
    ) -> Result<Vec<(String, semver::Version)>, ChangelogError> {
        let current = version.semver();
        let mut tags: Vec<(String, semver::Version)> = self
            .source_control
            .list_tags()
            .await?
            .into_iter()
            .filter_map(|tag| {
                let parsed = ReleaseVersion::parse(&tag)?.semver()?;
                Some((tag, parsed))
            })
            .filter(|(_, parsed)| current.as_ref().map_or(true, |current| parsed <= current))
            .collect();
        tags.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| b.0.starts_with('v').cmp(&a.0.starts_with('v')))
        });
        tags.dedup_by(|later, kept| later.1 == kept.1);
        Ok(tags)
    }

    fn keep(&self, commit: &CommitInfo) -> bool {
        self.marker.is_empty() || !commit.subject.contains(&self.marker)
    }

    /// Build the changelog for every release up to `version`
    pub async fn generate(&self, version: &ReleaseVersion) -> Result<Changelog, ChangelogError> {
        let mut tags = self.version_tags(version).await?;
        let current_tag = version.tag();
        let tagged = tags
            .iter()
            .any(|(name, parsed)| *name == current_tag || Some(parsed) == version.semver().as_ref());
        debug!("Found {} version tag(s), current release tagged: {}", tags.len(), tagged);

        let mut sections = Vec::with_capacity(tags.len() + 1);
        let mut previous: Option<String> = None;

        for (tag, _) in tags.drain(..) {
            let commits = self
                .source_control
                .commits_between(previous.as_deref(), Some(&tag))
                .await?;
            sections.push(self.section(&tag, &commits));
            previous = Some(tag);
        }

        if !tagged {
            let commits = self
                .source_control
                .commits_between(previous.as_deref(), None)
                .await?;
            sections.push(self.section(&current_tag, &commits));
        }

        sections.reverse();
        info!("Generated changelog with {} section(s)", sections.len());
        Ok(Changelog { sections })
    }

    fn section(&self, tag: &str, commits: &[CommitInfo]) -> ChangelogSection {
        let mut section = ChangelogSection::new(tag);
        for commit in commits.iter().filter(|c| self.keep(c)) {
            section.push(commit);
        }
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::memory::MemorySourceControl;

    fn commit(subject: &str) -> CommitInfo {
        CommitInfo {
            sha: "0123456789abcdef".to_string(),
            subject: subject.to_string(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&commit("feat(editor): slash commands")),
            (ChangeKind::Feature, "**editor:** slash commands (0123456)".to_string())
        );
        assert_eq!(classify(&commit("fix: crash on empty note")).0, ChangeKind::Fix);
        assert_eq!(classify(&commit("docs: readme")).0, ChangeKind::Other);
        assert_eq!(
            classify(&commit("Update translations")),
            (ChangeKind::Other, "Update translations (0123456)".to_string())
        );
        assert!(classify(&commit("feat!: new storage format")).1.starts_with("**BREAKING**"));
    }

    fn history() -> Arc<MemorySourceControl> {
        let scm = Arc::new(MemorySourceControl::new());
        scm.add_commit("feat: first release");
        scm.tag("v1.0.0");
        scm.add_commit("fix(sync): retry uploads");
        scm.add_commit("chore(release): bump version to 1.1.0 [release-bot]");
        scm.tag("v1.1.0");
        scm.tag("nightly");
        scm.add_commit("feat(ai): summarize notes");
        scm.add_commit("chore(release): bump version to 1.2.0 [release-bot]");
        scm
    }

    #[tokio::test]
    async fn test_untagged_release_covers_commits_since_last_tag() {
        let generator = ChangelogGenerator::new(history(), "[release-bot]");
        let changelog = generator
            .generate(&ReleaseVersion::parse("1.2.0").unwrap())
            .await
            .unwrap();

        let tags: Vec<_> = changelog.sections.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["v1.2.0", "v1.1.0", "v1.0.0"]);
        assert_eq!(changelog.sections[0].features.len(), 1);
        assert!(changelog.sections[0].other.is_empty());
        assert_eq!(changelog.sections[1].fixes.len(), 1);
    }

    #[tokio::test]
    async fn test_marker_commits_excluded_from_render() {
        let generator = ChangelogGenerator::new(history(), "[release-bot]");
        let body = generator
            .generate(&ReleaseVersion::parse("1.2.0").unwrap())
            .await
            .unwrap()
            .render();

        assert!(!body.contains("[release-bot]"));
        assert!(body.starts_with("## v1.2.0"));
        assert!(body.contains("### Bug Fixes\n\n- **sync:** retry uploads"));
    }

    #[tokio::test]
    async fn test_tagged_release_stops_at_its_tag() {
        let generator = ChangelogGenerator::new(history(), "[release-bot]");
        let changelog = generator
            .generate(&ReleaseVersion::parse("1.1.0").unwrap())
            .await
            .unwrap();

        let tags: Vec<_> = changelog.sections.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["v1.1.0", "v1.0.0"]);
    }

    #[tokio::test]
    async fn test_duplicate_version_tags_give_one_section() {
        let scm = history();
        scm.tag("1.1.0");
        scm.tag("1.0.0");
        let generator = ChangelogGenerator::new(scm, "[release-bot]");
        let changelog = generator
            .generate(&ReleaseVersion::parse("1.2.0").unwrap())
            .await
            .unwrap();

        let tags: Vec<_> = changelog.sections.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["v1.2.0", "v1.1.0", "v1.0.0"]);
    }
}
