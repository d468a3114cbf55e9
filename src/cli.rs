// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use keel::output::OutputMode;
use keel::rollout::BatchPolicy;
use keel::types::{ArtifactId, RolloutId, TagFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Batched artifact rollouts with lifecycle hooks and automatic rollback")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Fleet file (default: keel.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else {
            OutputMode::Normal
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new keel.yml fleet file
    Init {
        /// Application name
        #[arg(short, long)]
        application: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List hosts and what they last deployed successfully
    Hosts {
        /// Tag filter, e.g. "role=web,zone=a"
        #[arg(short, long, value_parser = parse_tags)]
        tags: Option<TagFilter>,
    },

    /// Roll an artifact out to the selected hosts
    Deploy {
        /// Artifact id (declared in the fleet file)
        #[arg(short, long, value_parser = parse_artifact)]
        artifact: ArtifactId,

        /// Tag filter selecting hosts
        #[arg(short, long, value_parser = parse_tags)]
        tags: Option<TagFilter>,

        /// Batch policy: "all", a batch size, or a percentage like "25%"
        #[arg(short, long, value_parser = parse_batch)]
        batch: Option<BatchPolicy>,

        /// Fraction of a batch allowed to fail before the rollout reverts
        #[arg(long)]
        max_failure_ratio: Option<f64>,

        /// Leave failed hosts in place instead of restoring the previous artifact
        #[arg(long)]
        no_rollback: bool,
    },

    /// Show a rollout, or recent rollouts when no id is given
    Status {
        #[arg(value_parser = parse_rollout)]
        rollout: Option<RolloutId>,
    },

    /// Cancel a running rollout
    Cancel {
        #[arg(value_parser = parse_rollout)]
        rollout: RolloutId,
    },
}

fn parse_tags(s: &str) -> Result<TagFilter, String> {
    TagFilter::parse(s).map_err(|e| e.to_string())
}

fn parse_batch(s: &str) -> Result<BatchPolicy, String> {
    BatchPolicy::parse(s).map_err(|e| e.to_string())
}

fn parse_artifact(s: &str) -> Result<ArtifactId, String> {
    Ok(ArtifactId::new(s))
}

fn parse_rollout(s: &str) -> Result<RolloutId, String> {
    Ok(RolloutId::new(s))
}
