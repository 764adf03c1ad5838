//! Info command - show store statistics.

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use crate::commands::Session;
use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StoreInfo {
    store: String,
    records: usize,
    next_id: u32,
    roots: usize,
    names: usize,
    blobs: usize,
    blob_bytes: u64,
    cached_blobs: u64,
    cached_nodes: usize,
}

#[instrument(level = "info", name = "cmd::info", skip_all)]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let stats = session.vfs.stats();
    let info = StoreInfo {
        store: session.store.display().to_string(),
        records: stats.records.live_records,
        next_id: stats.records.next_id,
        roots: stats.records.roots,
        names: stats.names,
        blobs: stats.content.blobs,
        blob_bytes: stats.content.bytes,
        cached_blobs: stats.content.cached,
        cached_nodes: stats.cached_nodes,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Store".to_string(), info.store]);
    table.add_row(vec!["Records".to_string(), info.records.to_string()]);
    table.add_row(vec!["Next id".to_string(), info.next_id.to_string()]);
    table.add_row(vec!["Roots".to_string(), info.roots.to_string()]);
    table.add_row(vec!["Names".to_string(), info.names.to_string()]);
    table.add_row(vec!["Content blobs".to_string(), info.blobs.to_string()]);
    table.add_row(vec![
        "Content bytes".to_string(),
        crate::output::format_size(i64::try_from(info.blob_bytes).unwrap_or(i64::MAX)),
    ]);
    println!("{table}");
    Ok(())
}
