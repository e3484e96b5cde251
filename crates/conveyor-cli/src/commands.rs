//! CLI command definitions.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the master configuration
    Validate,

    /// Print the resolved stage commands of a builder or tester
    Stages {
        /// Builder or tester name
        name: String,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Build one builder now, skipping the stability timer
    Trigger {
        /// Builder name
        builder: String,

        #[command(flatten)]
        source: SourceArgs,

        /// Recorded as the job's requester
        #[arg(long, env = "USER")]
        actor: Option<String>,
    },

    /// Run the master: read change events and build until input ends
    Run {
        /// NDJSON file of change events, `-` for stdin
        #[arg(short, long, default_value = "-")]
        changes: PathBuf,

        /// Keep reading the changes file as it grows, polling at
        /// `timers.poll_interval_secs`
        #[arg(short, long)]
        follow: bool,
    },
}

/// Source stamp given on the command line.
#[derive(Args)]
pub struct SourceArgs {
    /// Repository URL
    #[arg(long)]
    pub repository: String,

    /// Branch name
    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Revision to build
    #[arg(long)]
    pub revision: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
