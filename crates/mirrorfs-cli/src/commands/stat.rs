//! Stat command - print the mirrored record of one file.

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use mirrorfs_core::{ContentId, FileId, PersistentFs};

use super::resolve;
use crate::output::{create_table, format_entry_type, format_flags, format_size, format_timestamp};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Local path or mirror URL
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatOutput {
    id: u32,
    url: String,
    name: String,
    parent: Option<u32>,
    root: Option<u32>,
    #[serde(rename = "type")]
    entry_type: &'static str,
    length: i64,
    timestamp: i64,
    flags: Vec<&'static str>,
    attributes: u32,
    content: Option<u32>,
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub fn execute(vfs: &PersistentFs, args: &Args) -> Result<()> {
    let (id, url) = resolve(vfs, &args.path)?;
    let record = vfs
        .record(id)
        .ok_or_else(|| anyhow::anyhow!("Record {id} vanished"))?;
    let name = vfs.name(id).map(|n| n.to_string()).unwrap_or_default();
    let parent = vfs.parent(id);
    let root = vfs.root_of(id);
    let content = (!record.content_id.is_none()).then_some(record.content_id);

    if args.json {
        let output = StatOutput {
            id: id.as_u32(),
            url,
            name,
            parent: parent.map(FileId::as_u32),
            root: root.map(FileId::as_u32),
            entry_type: format_entry_type(&record),
            length: record.length,
            timestamp: record.timestamp,
            flags: record.flags.iter_names().map(|(name, _)| name).collect(),
            attributes: vfs.attributes_bitmask(id).unwrap_or_default(),
            content: content.map(ContentId::as_u32),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Id".to_string(), id.to_string()]);
    table.add_row(vec!["URL".to_string(), url]);
    table.add_row(vec!["Name".to_string(), name]);
    table.add_row(vec!["Parent".to_string(), or_dash(parent.map(|p| p.to_string()))]);
    table.add_row(vec!["Root".to_string(), or_dash(root.map(|r| r.to_string()))]);
    table.add_row(vec!["Type".to_string(), format_entry_type(&record).to_string()]);
    table.add_row(vec!["Size".to_string(), format_size(record.length)]);
    table.add_row(vec!["Modified".to_string(), format_timestamp(record.timestamp)]);
    table.add_row(vec!["Flags".to_string(), format_flags(record.flags)]);
    table.add_row(vec!["Content".to_string(), or_dash(content.map(|c| c.to_string()))]);
    println!("{table}");
    Ok(())
}
