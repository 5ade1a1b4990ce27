//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{BumpCommand, HistoryCommand, ListCommand, ResolveCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Release orchestrator for Blinko
#[derive(Debug, Parser, Clone)]
#[command(name = "blinko-release")]
#[command(author = "Blinko Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Propagates release versions, fans out platform builds and assembles multi-arch images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the release pipeline file
    #[arg(short, long, global = true, default_value = "release.yaml")]
    pub config: String,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the release pipeline for a trigger
    Run(RunCommand),

    /// Print the version a trigger resolves to
    Resolve(ResolveCommand),

    /// Write the resolved version into the manifests and commit it
    Bump(BumpCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
