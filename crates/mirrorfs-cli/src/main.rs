#![deny(unsafe_code)]

mod commands;
mod config;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{Session, cat, info, ls, roots, scan, stat};
use crate::config::CliConfig;

/// Inspect and populate a persistent filesystem mirror
#[derive(Parser)]
#[command(name = "mirrorfs")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Mirror a project directory
    mirrorfs --store ~/.cache/mirrorfs scan ~/projects/demo

    # List it again without touching the disk
    mirrorfs --store ~/.cache/mirrorfs ls ~/projects/demo

    # Read an entry of a zip archive
    mirrorfs --store ~/.cache/mirrorfs cat 'lib.zip!/META-INF/MANIFEST.MF'
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory holding the mirror store
    #[arg(long, env = "MIRRORFS_STORE", value_name = "DIR", global = true)]
    store: Option<PathBuf>,

    /// Configuration file (default: <store>/mirrorfs.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a local directory as a root and mirror its tree
    Scan(scan::Args),

    /// List a mirrored directory
    Ls(ls::Args),

    /// Show the mirrored record of a file
    Stat(stat::Args),

    /// Print file content through the content cache
    Cat(cat::Args),

    /// List known roots
    Roots(roots::Args),

    /// Show store statistics
    Info(info::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let config = CliConfig::load(cli.config.as_deref(), cli.store.as_deref())?;
    let Some(store) = cli.store.or(config.store) else {
        bail!("No store directory: pass --store or set MIRRORFS_STORE");
    };

    let session = Session::open(&store, config.vfs)?;
    let result = match &cli.command {
        Commands::Scan(args) => scan::execute(&session.vfs, args),
        Commands::Ls(args) => ls::execute(&session.vfs, args),
        Commands::Stat(args) => stat::execute(&session.vfs, args),
        Commands::Cat(args) => cat::execute(&session.vfs, args),
        Commands::Roots(args) => roots::execute(&session.vfs, args),
        Commands::Info(args) => info::execute(&session, args),
    };
    let closed = session.close();
    result?;
    closed
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
