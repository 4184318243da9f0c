//! ShoalDB CLI
//!
//! Command-line tools for ShoalDB databases, local or remote.
//!
//! # Commands
//!
//! - `exec` - Run one JSON command and print the response envelope
//! - `collections` - List collections
//! - `compact` - Compact a collection
//! - `ping` - Check that the database answers
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::Target;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShoalDB command-line database tools.
#[derive(Parser)]
#[command(name = "shoaldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Server address (host:port) instead of a local directory
    #[arg(global = true, short, long)]
    remote: Option<String>,

    /// Log in as this user; the password is read from SHOALDB_PASSWORD
    #[arg(global = true, short, long)]
    user: Option<String>,

    /// File holding the 32-byte encryption key (local directories only)
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one JSON command, e.g. '{"op":"find","collection":"users"}'
    Exec {
        /// The command object
        command: String,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// List collections
    Collections {
        /// Show document counts
        #[arg(short, long)]
        counts: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compact a collection to reclaim space
    Compact {
        /// Collection name
        collection: String,
    },

    /// Check that the database answers
    Ping,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("ShoalDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Storage format v{}", shoaldb_core::FORMAT_VERSION);
        return Ok(());
    }

    let mut target = Target::open(
        cli.path.as_deref(),
        cli.remote.as_deref(),
        cli.key_file.as_deref(),
    )?;
    if let Some(user) = &cli.user {
        let password = std::env::var("SHOALDB_PASSWORD")
            .map_err(|_| "SHOALDB_PASSWORD must hold the password for --user")?;
        target.login(user, &password)?;
    }

    match cli.command {
        Commands::Exec { command, pretty } => commands::exec::run(&mut target, &command, pretty)?,
        Commands::Collections { counts, format } => {
            commands::collections::run(&mut target, counts, &format)?;
        }
        Commands::Compact { collection } => commands::compact::run(&mut target, &collection)?,
        Commands::Ping => commands::ping::run(&mut target)?,
        Commands::Version => {}
    }

    Ok(())
}
