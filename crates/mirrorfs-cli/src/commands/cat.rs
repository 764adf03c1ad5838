use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use std::io::{self, Write};
use tracing::instrument;

use mirrorfs_core::PersistentFs;

use super::resolve;

#[derive(ClapArgs)]
pub struct Args {
    /// Local path or mirror URL
    pub file: String,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(file = %args.file))]
pub fn execute(vfs: &PersistentFs, args: &Args) -> Result<()> {
    let (id, _) = resolve(vfs, &args.file)?;
    if vfs.is_directory(id) {
        bail!("Is a directory: {}", args.file);
    }
    let content = vfs.read_content(id)?;
    io::stdout().write_all(&content)?;
    Ok(())
}
