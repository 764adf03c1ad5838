//! Scan command - register a local directory as a root and mirror its tree.
//!
//! # Examples
//!
//! ```bash
//! # Mirror everything up to eight levels below the directory
//! mirrorfs --store ~/.cache/mirrorfs scan ~/projects/demo
//!
//! # Only the top two levels
//! mirrorfs --store ~/.cache/mirrorfs scan ~/projects/demo --depth 2
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::{info, instrument, warn};

use mirrorfs_core::{FileId, PersistentFs};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Directory to mirror
    pub dir: PathBuf,

    /// Directory levels to reconcile below the root
    #[arg(long, default_value_t = 8)]
    pub depth: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Default)]
struct ScanSummary {
    root: u32,
    url: String,
    directories: usize,
    files: usize,
    errors: usize,
}

#[instrument(level = "info", name = "cmd::scan", skip_all, fields(dir = %args.dir.display()))]
pub fn execute(vfs: &PersistentFs, args: &Args) -> Result<()> {
    let dir = fs::canonicalize(&args.dir)
        .with_context(|| format!("Cannot scan {}", args.dir.display()))?;
    if !dir.is_dir() {
        bail!("Not a directory: {}", args.dir.display());
    }
    let path = dir.to_string_lossy().replace('\\', "/");
    let Some(root) = vfs.find_root("file", &path)? else {
        bail!("Directory vanished while scanning: {path}");
    };

    let mut summary = ScanSummary {
        root: root.as_u32(),
        url: vfs.url_of(root).unwrap_or_else(|| format!("file://{path}")),
        directories: 1,
        ..ScanSummary::default()
    };
    let mut pending: Vec<(FileId, usize)> = vec![(root, 0)];
    while let Some((current, level)) = pending.pop() {
        let children = match vfs.list_all(current) {
            Ok(children) => children,
            Err(e) => {
                warn!(id = %current, error = %e, "skipping unreadable directory");
                summary.errors += 1;
                continue;
            }
        };
        for child in children {
            if child.record.is_directory() {
                summary.directories += 1;
                if level + 1 < args.depth {
                    pending.push((child.id, level + 1));
                }
            } else {
                summary.files += 1;
            }
        }
    }
    info!(
        directories = summary.directories,
        files = summary.files,
        errors = summary.errors,
        "scan finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Mirrored {} directories and {} files under {} (root {})",
            summary.directories,
            summary.files,
            summary.url,
            FileId::from_raw(summary.root)
        );
        if summary.errors > 0 {
            println!("{} directories could not be read", summary.errors);
        }
    }
    Ok(())
}
