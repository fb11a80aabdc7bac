use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "revlog",
    about = "revlog: batched ref transactions over entity histories",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding one subdirectory per repository
    #[arg(long, global = true, default_value = ".revlog")]
    pub root: PathBuf,

    /// TOML configuration file; defaults to <root>/revlog.toml when present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write objects but move no refs
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a project repository and the shared repository
    Init(InitArgs),
    /// Append a commit to an entity's metadata or annotation ref
    Put(PutArgs),
    /// Append a commit to an account's draft ref for an entity
    Draft(DraftArgs),
    /// Remove a key from every commit of an entity's metadata history
    Purge(PurgeArgs),
    /// Delete an entity's metadata ref and all of its draft refs
    Delete(DeleteArgs),
    /// List refs in a repository
    Refs(RefsArgs),
    /// Show the first-parent history of an entity ref
    Log(LogArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub project: String,
}

/// Options shared by commands that append a commit.
#[derive(Args)]
pub struct CommitArgs {
    /// `key=value` entries to write
    #[arg(value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,
    /// Keys to remove
    #[arg(long = "remove")]
    pub remove: Vec<String>,
    #[arg(short, long, default_value = "Update entity")]
    pub message: String,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    /// Expected state, `N` or `<meta>[,<account>=<hex>]*`
    #[arg(long)]
    pub expect: Option<String>,
}

#[derive(Args)]
pub struct PutArgs {
    pub project: String,
    pub entity: u32,
    /// Target the annotation ref instead of the metadata ref
    #[arg(long)]
    pub annotation: bool,
    /// Allow creating the ref
    #[arg(long)]
    pub create: bool,
    #[command(flatten)]
    pub commit: CommitArgs,
}

#[derive(Args)]
pub struct DraftArgs {
    pub project: String,
    pub entity: u32,
    pub account: u32,
    #[command(flatten)]
    pub commit: CommitArgs,
}

#[derive(Args)]
pub struct PurgeArgs {
    pub project: String,
    pub entity: u32,
    pub key: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub project: String,
    pub entity: u32,
}

#[derive(Args)]
pub struct RefsArgs {
    pub repo: String,
    #[arg(long, default_value = "refs/")]
    pub prefix: String,
}

#[derive(Args)]
pub struct LogArgs {
    pub project: String,
    pub entity: u32,
    /// Show this account's draft ref instead of the metadata ref
    #[arg(long, conflicts_with = "annotation")]
    pub account: Option<u32>,
    /// Show the annotation ref instead of the metadata ref
    #[arg(long)]
    pub annotation: bool,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub oneline: bool,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}
