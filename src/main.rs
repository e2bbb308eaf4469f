//! Snowblower CLI
//!
//! Entry point for the `snowblower` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use snowblower::manifest::{VersionId, DEFAULT_MANIFEST_URL};
use snowblower::pipeline::{Pipeline, PipelineConfig};

/// The oldest version with published mappings; generation floors here
const DEFAULT_START_VER: &str = "1.14.4";

#[derive(Parser)]
#[command(name = "snowblower")]
#[command(about = "Builds a git history out of decompiled game versions", version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Output directory to put the git directory in
    #[arg(long)]
    output: PathBuf,

    /// Cache directory to hold all files related to a version
    #[arg(long, default_value = "./cache")]
    cache: PathBuf,

    /// Directory with extra mappings files, laid out as
    /// <type>/<version>/maps/<side>.txt
    #[arg(long)]
    extra_mappings: Option<PathBuf>,

    /// The starting version to generate from (inclusive)
    #[arg(long, default_value = DEFAULT_START_VER)]
    start_ver: String,

    /// The target version to generate up to (inclusive), or "latest"
    #[arg(long, default_value = "latest")]
    target_ver: String,

    /// The git branch name, creating an orphan branch if it does not
    /// exist; uses the checked-out branch if omitted
    #[arg(long, alias = "branch-name")]
    branch: Option<String>,

    /// Remote URL to fetch from and push to
    #[arg(long)]
    remote: Option<String>,

    /// Check out the remote branch instead of building on the local one
    #[arg(long)]
    checkout: bool,

    /// Push commits to the remote in batches
    #[arg(long)]
    push: bool,

    /// Start over by deleting the target branch
    #[arg(long)]
    start_over: bool,

    /// Start over only when the existing history is incompatible with
    /// this run
    #[arg(long)]
    start_over_if_required: bool,

    /// Delete large intermediate archives as soon as they are consumed
    #[arg(long)]
    partial_cache: bool,

    /// Only consider release versions
    #[arg(long)]
    releases_only: bool,

    /// Include only archive entries matching this glob (repeatable)
    #[arg(long = "include")]
    includes: Vec<String>,

    /// Skip archive entries matching this glob (repeatable)
    #[arg(long = "exclude")]
    excludes: Vec<String>,

    /// Branch config URI, file:// or https:// (repeatable, last wins)
    #[arg(long = "cfg")]
    configs: Vec<String>,

    /// Version catalogue URL
    #[arg(long, default_value = DEFAULT_MANIFEST_URL, hide = true)]
    manifest_url: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let end = if cli.target_ver.eq_ignore_ascii_case("latest") {
        None
    } else {
        Some(VersionId::from(&cli.target_ver))
    };

    let config = PipelineConfig {
        output: cli.output,
        cache: cli.cache,
        extra_mappings: cli.extra_mappings,
        branch: cli.branch,
        remote: cli.remote,
        checkout: cli.checkout,
        push: cli.push,
        start_over: cli.start_over,
        start_over_if_required: cli.start_over_if_required,
        partial_cache: cli.partial_cache,
        releases_only: cli.releases_only,
        start: Some(VersionId::from(&cli.start_ver)),
        end,
        includes: cli.includes,
        excludes: cli.excludes,
        configs: cli.configs,
        manifest_url: cli.manifest_url,
    };

    if let Err(e) = Pipeline::new(config).run() {
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}
