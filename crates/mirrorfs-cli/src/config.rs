//! Optional TOML configuration for the CLI.
//!
//! Looked up at `--config <FILE>` when given, otherwise at
//! `<store>/mirrorfs.toml`. A missing default file means defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use mirrorfs_core::VfsConfig;

/// File name looked up inside the store directory.
pub const DEFAULT_CONFIG_FILE: &str = "mirrorfs.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Store directory, used when neither `--store` nor `MIRRORFS_STORE` is set.
    pub store: Option<PathBuf>,

    /// Mirror settings.
    pub vfs: VfsConfig,
}

impl CliConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    /// Reads an explicit config file. The file must exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Resolves the configuration for a run.
    pub fn load(explicit: Option<&Path>, store: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match store.map(|dir| dir.join(DEFAULT_CONFIG_FILE)) {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}
