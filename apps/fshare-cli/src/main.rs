//! fshare entry point.

mod config;
mod downloads;
mod peer;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fshare_bus::{RelayServer, ServerConfig};

use crate::config::{Config, DEFAULT_RELAY_PORT};

/// Share files peer to peer, bootstrapped through a WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "fshare", author, version, about)]
struct Cli {
    /// Verbosity (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ~/.config/fshare/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity announced on the relay.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Relay WebSocket URL.
    #[arg(long, global = true)]
    relay_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay peers meet on.
    Relay {
        #[arg(short, long, default_value_t = DEFAULT_RELAY_PORT)]
        port: u16,
    },
    /// Offer a file to a peer.
    Send {
        /// Identity of the receiving peer.
        peer: String,
        file: PathBuf,
    },
    /// Accept offers and save the files.
    Receive {
        /// Exit after the first file.
        #[arg(long)]
        once: bool,

        /// Download directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting fshare");

    if let Command::Relay { port } = cli.command {
        let server = RelayServer::new(ServerConfig { port });
        let stopper = server.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stopper.shutdown();
            }
        });
        server.run().await?;
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(name) = cli.name {
        config.name = name;
    }
    if let Some(url) = cli.relay_url {
        config.relay_url = url;
    }

    match cli.command {
        Command::Send { peer, file } => peer::send(&config, &peer, &file).await,
        Command::Receive { once, output } => {
            if let Some(dir) = output {
                config.download_dir = dir;
            }
            peer::receive(&config, once).await
        }
        Command::Relay { .. } => Ok(()),
    }
}
