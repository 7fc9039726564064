use clap::Parser;
use client::bot::random_command;
use client::network::Client;
use client::peer::PeerConfig;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{LedgerWorld, Role};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3979")]
    server: String,

    /// Name shown to other peers
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Company to play as; spectate when omitted
    #[arg(short = 'c', long)]
    company: Option<u8>,

    /// Number of companies on the server, for fund transfers
    #[arg(long, default_value = "15")]
    companies: u8,

    /// Game password, if the server has one
    #[arg(long)]
    password: Option<String>,

    /// Company password, if the company has one
    #[arg(long)]
    company_password: Option<String>,

    /// Milliseconds between random commands
    #[arg(short = 'i', long, default_value = "500")]
    interval_ms: u64,

    /// Seconds to stay connected
    #[arg(short = 'd', long, default_value = "60")]
    duration_secs: u64,

    /// Seed for the command generator
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let role = args.company.map_or(Role::Spectator, Role::Company);

    let mut config = PeerConfig::new(args.name.clone(), role);
    config.game_password = args.password;
    config.company_password = args.company_password;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("Starting bot {:?} as {}", args.name, role);
    let mut client: Client<LedgerWorld> = Client::connect(&args.server, config).await?;
    let companies = args.companies;
    client
        .run(
            Duration::from_secs(args.duration_secs),
            Duration::from_millis(args.interval_ms),
            |peer| Some(random_command(&mut rng, peer.role(), companies)),
        )
        .await?;

    if let Some(world) = client.peer().world() {
        info!(
            "Finished at tick {} with checksum {:016x}",
            client.peer().executed_tick(),
            shared::World::checksum(world)
        );
    }
    Ok(())
}
