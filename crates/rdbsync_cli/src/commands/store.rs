//! Store naming commands.

use std::io::Write;

use rdbsync_store::{distributed_table_name, store_identifier};

/// Prints the hex engine identifier of a store.
pub fn identifier(
    user: &str,
    app: &str,
    store: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "{}", hex::encode(store_identifier(user, app, store)))?;
    Ok(())
}

/// Prints the distributed name of `table` on the device `uuid`.
pub fn table_name(uuid: &str, table: &str, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "{}", distributed_table_name(uuid, table))?;
    Ok(())
}
