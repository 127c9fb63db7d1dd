use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "buildgraph", author, about, version)]
pub struct Args {
    /// Be verbose. Provide once for "warn", twice for "info", and so on.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Build script identity, used in the persisted-state path.
    #[arg(long, default_value = "default")]
    pub script: String,

    /// Root of the engine-owned cache directory.
    #[arg(long, default_value = ".buildgraph")]
    pub cache_root: Utf8PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one incremental build.
    Build(BuildArgs),
    /// One-shot build standing in for the dev server's build pipeline.
    Serve(BuildArgs),
    /// One-shot build standing in for a test-runner's build pipeline.
    Test(BuildArgs),
    /// One-shot build standing in for the file-watcher's build pipeline.
    Watch(BuildArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct BuildArgs {
    /// Treat pre-existing files at a to-be-generated path as absent.
    #[arg(long)]
    pub delete_conflicting_outputs: bool,

    /// Further serialize work and disable speculative on-demand prefetch.
    #[arg(long)]
    pub low_resources_mode: bool,

    /// Named alternate build configuration (unused by the single-config
    /// pipeline implemented here; accepted for CLI-surface compatibility).
    #[arg(long)]
    pub config: Option<String>,

    /// Restricts which hidden outputs must be produced this run.
    #[arg(long = "build-filter")]
    pub build_filter: Vec<String>,

    /// Restricts which non-hidden outputs must be produced this run.
    #[arg(long)]
    pub output: Option<Utf8PathBuf>,
}
