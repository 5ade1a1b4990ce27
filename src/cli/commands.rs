//! CLI command definitions

use crate::core::{DispatchInputs, DispatchPayload, TriggerContext};
use crate::execution::SchedulingStrategy;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// What started the run, as given on the command line
#[derive(Debug, Args, Clone, Default)]
pub struct TriggerArgs {
    /// Git ref of the run (e.g. refs/tags/v1.2.3)
    #[arg(long = "tag", env = "GITHUB_REF")]
    pub git_ref: Option<String>,

    /// Explicit version of a manual run
    #[arg(long, env = "RELEASE_VERSION")]
    pub version: Option<String>,

    /// Trigger the sibling pipeline (manual runs)
    #[arg(long)]
    pub trigger_sibling: bool,

    /// Give published images the "latest" tag (manual runs)
    #[arg(long)]
    pub latest: bool,

    /// JSON client payload of an upstream dispatch ({"tag", "version", "sha"})
    #[arg(long)]
    pub payload: Option<String>,
}

impl TriggerArgs {
    /// Build the trigger context. A payload means an upstream dispatch; any
    /// manual input means a manual dispatch; otherwise the ref is a tag push.
    pub fn to_trigger(&self) -> Result<TriggerContext> {
        if let Some(json) = &self.payload {
            let payload = DispatchPayload::from_json(json).context("Invalid dispatch payload")?;
            return Ok(TriggerContext::UpstreamDispatch {
                payload,
                git_ref: self.git_ref.clone(),
            });
        }

        if self.version.is_some() || self.trigger_sibling || self.latest {
            return Ok(TriggerContext::ManualDispatch {
                inputs: DispatchInputs {
                    version: self.version.clone(),
                    trigger_sibling: self.trigger_sibling,
                    set_latest: self.latest,
                },
                git_ref: self.git_ref.clone(),
            });
        }

        Ok(TriggerContext::TagPush {
            git_ref: self.git_ref.clone().unwrap_or_default(),
        })
    }
}

/// Run the release pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Stage limit for parallel-limited
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Repository root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// `owner/name` of the repository hosting releases
    #[arg(long)]
    pub repository: Option<String>,

    /// Run against in-memory capabilities; nothing is written or pushed
    #[arg(long)]
    pub dry_run: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Print the resolved version
#[derive(Debug, Args, Clone)]
pub struct ResolveCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Propagate the resolved version into the manifests
#[derive(Debug, Args, Clone)]
pub struct BumpCommand {
    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Repository root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Show what would change without writing or committing
    #[arg(long)]
    pub dry_run: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl SchedulingStrategyArg {
    pub fn to_strategy(self, max_parallel: usize) -> SchedulingStrategy {
        match self {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(max_parallel.max(1))
            }
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
