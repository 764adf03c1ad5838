//! Roots command - list the roots known to the store.

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use mirrorfs_core::{FileId, PersistentFs};

use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RootEntry {
    id: u32,
    url: String,
    host: Option<u32>,
}

#[instrument(level = "info", name = "cmd::roots", skip_all)]
pub fn execute(vfs: &PersistentFs, args: &Args) -> Result<()> {
    let entries: Vec<RootEntry> = vfs
        .roots()
        .iter()
        .map(|info| RootEntry {
            id: info.id.as_u32(),
            url: info.url.to_string(),
            host: info.host.map(FileId::as_u32),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No roots. Run `mirrorfs scan <DIR>` first.");
        return Ok(());
    }
    let mut table = create_table();
    table.set_header(vec!["Id", "URL", "Host"]);
    for entry in &entries {
        table.add_row(vec![
            FileId::from_raw(entry.id).to_string(),
            entry.url.clone(),
            entry
                .host
                .map_or_else(|| "-".to_string(), |h| FileId::from_raw(h).to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
