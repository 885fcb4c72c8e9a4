//! teletable-cli - Command-line interface for teletable
//!
//! One-shot table commands and a live watch mode.

mod commands;

use clap::{Parser, Subcommand};
use teletable_client::ClientConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teletable-cli")]
#[command(about = "Command-line interface for the teletable telemetry table")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value_t = teletable_protocol::DEFAULT_PORT)]
    port: u16,

    /// Client identity sent during the handshake
    #[arg(long, default_value = "teletable-cli")]
    ident: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream table events to stdout
    Watch,

    /// Dump the table once the initial sync completes
    List,

    /// Assign or update an entry
    Set {
        /// Entry name
        name: String,

        /// Typed literal: true/false, a number, or a string
        value: String,

        /// Mark the entry persistent
        #[arg(long)]
        persistent: bool,
    },

    /// Delete an entry
    Delete {
        /// Entry name
        name: String,
    },

    /// Delete every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(&cli.server)
        .with_port(cli.port)
        .with_client_ident(&cli.ident);

    match cli.command {
        Commands::Watch => commands::watch(config).await,
        Commands::List => commands::list(config).await,
        Commands::Set {
            name,
            value,
            persistent,
        } => commands::set(config, &name, &value, persistent).await,
        Commands::Delete { name } => commands::delete(config, &name).await,
        Commands::Clear => commands::clear(config).await,
    }
}
