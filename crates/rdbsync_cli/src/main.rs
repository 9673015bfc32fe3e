//! RdbSync CLI
//!
//! Command-line tools for inspecting RdbSync service state.
//!
//! # Commands
//!
//! - `meta list` - List metadata entries
//! - `meta show` - Print one metadata entry
//! - `meta delete` - Delete one metadata entry
//! - `identifier` - Compute a store's engine identifier
//! - `table-name` - Compute a distributed table name
//! - `config show` - Print the effective service configuration

mod commands;

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// RdbSync command-line tools.
#[derive(Parser)]
#[command(name = "rdbsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the metadata directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit service metadata
    Meta {
        #[command(subcommand)]
        action: MetaCommand,
    },

    /// Compute the engine identifier of a store
    Identifier {
        /// User id owning the store
        #[arg(short, long)]
        user: String,

        /// Application id
        #[arg(short, long)]
        app: String,

        /// Store id (store name without `.db`)
        #[arg(short, long)]
        store: String,
    },

    /// Compute the distributed name of a table
    TableName {
        /// Uuid of the device the table lives on
        #[arg(short, long)]
        uuid: String,

        /// Local table name
        #[arg(short, long)]
        table: String,
    },

    /// Service configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum MetaCommand {
    /// List entries
    List {
        /// Only list keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print one entry
    Show {
        /// Entry key
        key: String,
    },

    /// Delete one entry
    Delete {
        /// Entry key
        key: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration with defaults filled in
    Show {
        /// Configuration file (JSON); defaults are used when absent
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut out = io::stdout().lock();
    match cli.command {
        Commands::Meta { action } => {
            let path = cli.path.ok_or("Metadata path required for meta")?;
            match action {
                MetaCommand::List { prefix, format } => {
                    commands::meta::list(&path, &prefix, &format, &mut out)?;
                }
                MetaCommand::Show { key } => commands::meta::show(&path, &key, &mut out)?,
                MetaCommand::Delete { key } => commands::meta::delete(&path, &key, &mut out)?,
            }
        }
        Commands::Identifier { user, app, store } => {
            commands::store::identifier(&user, &app, &store, &mut out)?;
        }
        Commands::TableName { uuid, table } => {
            commands::store::table_name(&uuid, &table, &mut out)?;
        }
        Commands::Config { action } => match action {
            ConfigCommand::Show { file } => commands::config::show(file.as_deref(), &mut out)?,
        },
        Commands::Version => {
            println!("RdbSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
