//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "iotops",
    version,
    about = "Operator CLI for the IoT Operations edge platform",
    long_about = None,
)]
pub struct Cli {
    /// Kubernetes context to use
    #[arg(long, global = true, env = "IOTOPS_CONTEXT")]
    pub context: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Support and diagnostics operations
    #[command(subcommand)]
    Support(SupportCommand),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand)]
pub enum SupportCommand {
    /// Collect a diagnostics bundle from the connected cluster
    #[command(name = "create-bundle", alias = "bundle")]
    CreateBundle(CreateBundleArgs),
}

#[derive(Args)]
pub struct CreateBundleArgs {
    /// Subsystems to collect; omit to collect everything discovered
    #[arg(long = "ops-service", value_name = "MONIKER")]
    pub ops_services: Vec<String>,

    /// Directory the bundle is written into
    #[arg(long, default_value = ".")]
    pub bundle_dir: PathBuf,

    /// Capture logs no older than this (seconds, or a duration like "24h")
    #[arg(long, default_value = "86400")]
    pub log_age: String,

    /// Capture broker traces from the diagnostics pod
    #[arg(long)]
    pub mq_traces: bool,

    /// Include Azure Arc agent workloads
    #[arg(long)]
    pub include_arc_agents: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
