//! Triggering the sibling pipeline

use crate::capability::Dispatcher;
use crate::core::{ReleaseVersion, Resolution};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// How the dispatch went. Failure never fails the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { repository: String, event_type: String },
    Skipped(String),
    Failed { warning: String },
}

pub struct SiblingDispatcher {
    dispatcher: Arc<dyn Dispatcher>,
}

/// Client payload of the dispatch event
pub fn dispatch_payload(version: &ReleaseVersion, sha: Option<&str>) -> serde_json::Value {
    json!({
        "tag": version.tag(),
        "version": version.as_str(),
        "sha": sha,
    })
}

impl SiblingDispatcher {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn dispatch(
        &self,
        resolution: &Resolution,
        repository: &str,
        event_type: &str,
        sha: Option<&str>,
        always: bool,
    ) -> DispatchOutcome {
        if !(always || resolution.trigger_sibling) {
            return DispatchOutcome::Skipped("sibling pipeline not requested".to_string());
        }

        let payload = dispatch_payload(&resolution.version, sha);
        match self.dispatcher.dispatch(repository, event_type, &payload).await {
            Ok(()) => {
                info!("Dispatched {} to {} for {}", event_type, repository, resolution.version);
                DispatchOutcome::Sent {
                    repository: repository.to_string(),
                    event_type: event_type.to_string(),
                }
            }
            Err(e) => {
                let warning = format!(
                    "Could not trigger {} on {}: {}. Check that the token has `repo` scope \
                     and access to {}, then re-run the dispatch stage or trigger it manually \
                     with version {}.",
                    event_type, repository, e, repository, resolution.version
                );
                warn!("{}", warning);
                DispatchOutcome::Failed { warning }
            }
        }
    }
}
