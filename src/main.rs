//! matchwager server binary
//!
//! Loads configuration, opens the ledger store and serves the HTTP API.

use clap::{Parser, Subcommand};
use matchwager::{
    api::ApiServer,
    config::{generate_sample_config, ConfigLoader, StorageBackend},
    services::LedgerServices,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "matchwager")]
#[command(about = "Wager ledger and settlement engine for community match betting", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// Database directory (overrides the config file)
    #[arg(long)]
    db_path: Option<String>,

    /// API server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long)]
    cors_origins: Option<String>,

    /// Keep all state in memory
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file and exit
    GenerateConfig {
        #[arg(default_value = "matchwager.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(Command::GenerateConfig { path }) = &args.command {
        generate_sample_config(path)?;
        println!("Wrote sample configuration to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(origins) = args.cors_origins {
        config.api.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("matchwager={},tower_http=info", config.monitoring.log_level.as_filter()).into()
            }),
        )
        .init();

    info!(
        backend = ?config.storage.backend,
        data_directory = %config.storage.data_directory,
        "Opening ledger store"
    );
    let services = Arc::new(LedgerServices::new(config.clone())?);

    ApiServer::new(config.api, services).run().await?;
    Ok(())
}
