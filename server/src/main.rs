use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::LedgerWorld;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with server settings; flags below override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Tick rate (ticks per second)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Maximum number of connected clients
    #[arg(short, long)]
    max_clients: Option<usize>,

    /// Password every client must give before joining
    #[arg(long)]
    password: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, server::error::ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if self.password.is_some() {
            config.game_password = self.password;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config()?;
    info!(
        "Starting server on {} at {} ticks per second",
        config.bind_address(),
        config.tick_rate
    );

    let server = Server::bind(config, LedgerWorld::new(), LedgerWorld::command_table()).await?;
    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.shutdown();
            }
            Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
