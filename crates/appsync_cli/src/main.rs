//! AppSync admin CLI
//!
//! Command-line tools for inspecting and repairing a relational AppSync store.
//!
//! # Commands
//!
//! - `last-modified` - Print a collection's last-modified timestamp
//! - `uuid` - Print a collection's uuid
//! - `list` - List a collection's records
//! - `delete` - Mark a collection deleted
//! - `import` - Add records from a JSON file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// AppSync relational store tools.
#[derive(Parser)]
#[command(name = "appsync-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// User owning the collection
    #[arg(global = true, short, long)]
    user: Option<String>,

    /// Collection name
    #[arg(global = true, short, long, default_value = "apps")]
    collection: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the collection's last-modified timestamp
    LastModified,

    /// Print the collection's uuid
    Uuid,

    /// List the collection's records
    List {
        /// Only records modified at or after this timestamp (seconds)
        #[arg(short, long, default_value = "0")]
        since: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Mark the collection deleted
    Delete {
        /// Client recorded as the deleter
        #[arg(long)]
        client_id: String,

        /// Reason recorded with the deletion
        #[arg(long)]
        reason: String,
    },

    /// Add records from a JSON file holding an array of objects
    Import {
        /// File to read
        file: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("appsync-admin v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required")?;
    let user = cli.user.ok_or("User required")?;
    let target = commands::Target::open(&path, &user, &cli.collection)?;

    match cli.command {
        Commands::LastModified => commands::read::last_modified(&target)?,
        Commands::Uuid => commands::read::uuid(&target)?,
        Commands::List { since, format } => {
            let since = since
                .parse::<appsync_storage::Timestamp>()
                .map_err(|e| format!("Invalid --since value {since:?}: {e}"))?;
            commands::read::list(&target, since, &format)?;
        }
        Commands::Delete { client_id, reason } => {
            commands::delete::run(&target, &client_id, &reason)?;
        }
        Commands::Import { file } => commands::import::run(&target, &file)?,
        Commands::Version => {}
    }

    Ok(())
}
