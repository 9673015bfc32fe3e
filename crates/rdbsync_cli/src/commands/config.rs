//! Configuration command.

use std::io::Write;
use std::path::Path;

use rdbsync_service::ServiceConfig;

/// Prints the configuration loaded from `file`, or the defaults.
pub fn show(file: Option<&Path>, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let config = match file {
        Some(file) => ServiceConfig::load(file)?,
        None => ServiceConfig::default(),
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&config)?)?;
    Ok(())
}
