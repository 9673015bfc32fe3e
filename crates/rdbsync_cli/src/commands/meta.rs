//! Metadata commands.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rdbsync_store::{FileMetaStore, MetaDataManager};
use serde::Serialize;
use serde_json::Value;

/// One listed entry.
#[derive(Debug, Serialize)]
pub struct MetaEntry {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: Value,
}

fn open(path: &Path) -> Result<MetaDataManager, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No metadata found at {:?}", path).into());
    }
    let store = FileMetaStore::open(path)?;
    Ok(MetaDataManager::new(Arc::new(store)))
}

/// Lists entries whose key starts with `prefix`.
pub fn list(
    path: &Path,
    prefix: &str,
    format: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let meta = open(path)?;
    let entries: Vec<MetaEntry> = meta
        .entries(prefix)?
        .into_iter()
        .map(|(key, value)| MetaEntry { key, value })
        .collect();
    tracing::debug!(prefix, count = entries.len(), "listed metadata");

    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?,
        "text" => {
            for entry in &entries {
                writeln!(out, "{}", entry.key)?;
            }
            writeln!(out, "{} entries", entries.len())?;
        }
        other => return Err(format!("Unknown format: {}", other).into()),
    }
    Ok(())
}

/// Prints the value under `key`.
pub fn show(path: &Path, key: &str, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let meta = open(path)?;
    let value: Value = meta
        .load_meta(key)?
        .ok_or_else(|| format!("No entry with key {}", key))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

/// Deletes the entry under `key`.
pub fn delete(path: &Path, key: &str, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let meta = open(path)?;
    if !meta.del_meta(key)? {
        return Err(format!("No entry with key {}", key).into());
    }
    tracing::info!(key, "deleted metadata entry");
    writeln!(out, "Deleted {}", key)?;
    Ok(())
}
