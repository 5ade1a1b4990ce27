//! Capabilities backed by command-line tools

pub mod builder;
pub mod docker;
pub mod gh;
pub mod git;
pub mod store;

pub use builder::CommandBuilder;
pub use docker::BuildxRegistry;
pub use gh::GhCli;
pub use git::GitCli;
pub use store::DirArtifactStore;

use crate::capability::{Capabilities, CapabilityConfig, CapabilityError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

impl Capabilities {
    /// Capabilities that drive git, gh, docker and the configured build commands
    pub fn system(config: &CapabilityConfig) -> Self {
        let gh = Arc::new(GhCli::new(config));
        Self {
            source_control: Arc::new(GitCli::new(config)),
            artifacts: Arc::new(DirArtifactStore::new(config.artifact_dir.clone())),
            registry: Arc::new(BuildxRegistry::new(config)),
            release_host: gh.clone(),
            builder: Arc::new(CommandBuilder::new(config.root.clone())),
            dispatcher: gh,
        }
    }
}

/// Run a tool to completion and return its stdout.
///
/// A non-zero exit becomes `CapabilityError::Command` carrying stderr.
pub(crate) async fn run_tool(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    timeout_secs: u64,
) -> Result<String, CapabilityError> {
    debug!("Running {} {}", program, args.join(" "));

    let result = timeout(
        Duration::from_secs(timeout_secs),
        Command::new(program)
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CapabilityError::Timeout(timeout_secs))?;

    let output = result?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code().unwrap_or(-1);
        warn!("{} exited with code {}: {}", program, code, stderr);
        return Err(CapabilityError::Command {
            command: program.to_string(),
            code,
            stderr,
        });
    }

    String::from_utf8(output.stdout)
        .map_err(|e| CapabilityError::InvalidOutput(format!("{} wrote non-UTF-8 output: {}", program, e)))
}

/// Owned argument list from string slices
pub(crate) fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
