//! List command - show the mirrored children of a directory.
//!
//! # Examples
//!
//! ```bash
//! # List a local directory (reconciled on first use)
//! mirrorfs ls ~/projects/demo
//!
//! # List inside a zip archive
//! mirrorfs ls 'lib.zip!/com'
//!
//! # Output as JSON for scripting
//! mirrorfs ls --json . | jq '.entries[].name'
//! ```

use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use mirrorfs_core::{ChildInfo, FileFlags, PersistentFs};

use super::resolve;
use crate::output::{create_table, format_entry_type, format_size};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Local directory or mirror URL
    #[arg(default_value = ".")]
    pub path: String,

    /// Include hidden entries
    #[arg(short, long)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct LsOutput {
    url: String,
    id: u32,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    id: u32,
    #[serde(rename = "type")]
    entry_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<i64>,
}

impl From<&ChildInfo> for EntryInfo {
    fn from(child: &ChildInfo) -> Self {
        Self {
            name: child.name.to_string(),
            id: child.id.as_u32(),
            entry_type: format_entry_type(&child.record),
            size: (!child.record.is_directory()).then_some(child.record.length),
        }
    }
}

fn is_hidden(child: &ChildInfo) -> bool {
    child.name.starts_with('.') || child.record.flags.contains(FileFlags::HIDDEN)
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub fn execute(vfs: &PersistentFs, args: &Args) -> Result<()> {
    let (dir, url) = resolve(vfs, &args.path)?;
    if !vfs.is_directory(dir) {
        bail!("Not a directory: {}", args.path);
    }

    let mut children = vfs.list_all(dir)?;
    children.retain(|child| args.all || !is_hidden(child));
    children.sort_by(|a, b| {
        b.record
            .is_directory()
            .cmp(&a.record.is_directory())
            .then_with(|| a.name.cmp(&b.name))
    });

    if args.json {
        let output = LsOutput {
            url,
            id: dir.as_u32(),
            entries: children.iter().map(EntryInfo::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if children.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    let mut table = create_table();
    table.set_header(vec!["Id", "Type", "Size", "Name"]);
    for child in &children {
        let size = if child.record.is_directory() {
            "-".to_string()
        } else {
            format_size(child.record.length)
        };
        table.add_row(vec![
            child.id.to_string(),
            format_entry_type(&child.record).to_string(),
            size,
            child.name.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
