//! ShoalDB server binary.
//!
//! Serves one database directory over TCP until interrupted.

use clap::Parser;
use shoaldb_core::{Config, Credentials, Database};
use shoaldb_server::{Server, ServerConfig, DEFAULT_PORT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serve a ShoalDB database over TCP.
#[derive(Parser)]
#[command(name = "shoaldb-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the database directory
    #[arg(short, long)]
    path: PathBuf,

    /// File holding a 32-byte encryption key
    #[arg(short, long)]
    key_file: Option<PathBuf>,

    /// File of `name:password` lines; connections must log in when set
    #[arg(long)]
    users_file: Option<PathBuf>,

    /// Host or address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Largest accepted request frame, in bytes
    #[arg(long)]
    max_frame_bytes: Option<usize>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bind_addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| format!("cannot resolve {}:{}", args.host, args.port))?;

    let mut config = ServerConfig::new(bind_addr);
    if let Some(bytes) = args.max_frame_bytes {
        config = config.with_max_frame_size(bytes);
    }
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }
    if let Some(secs) = args.idle_timeout_secs {
        config = config.with_idle_timeout(Duration::from_secs(secs));
    }
    if let Some(users_file) = &args.users_file {
        let credentials = Credentials::from_file(users_file)?;
        tracing::info!(users = credentials.len(), "login required");
        config = config.with_credentials(credentials);
    }

    let db = match &args.key_file {
        Some(key_file) => Database::open_encrypted(&args.path, key_file, Config::default())?,
        None => Database::open(&args.path, Config::default())?,
    };
    let db = Arc::new(db);

    let server = Server::bind(config, Arc::clone(&db)).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => tracing::warn!("connections still open, skipping final snapshot"),
    }
    Ok(())
}
