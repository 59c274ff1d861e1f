use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerMessage};
use shared::GameConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Authoritative snake arena server")]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Maximum concurrent clients
    #[clap(long, default_value = "32")]
    max_clients: usize,
    /// Maximum active pickups
    #[clap(long, default_value = "50")]
    pickup_capacity: usize,
    /// Seconds between pickup spawns
    #[clap(long, default_value = "2.0")]
    spawn_interval: f32,
    /// Head speed in world units per second
    #[clap(long, default_value = "3.0")]
    move_speed: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = GameConfig {
        max_clients: args.max_clients,
        pickup_capacity: args.pickup_capacity,
        initial_pickups: GameConfig::default().initial_pickups.min(args.pickup_capacity),
        spawn_interval: Duration::from_secs_f32(args.spawn_interval.max(0.0)),
        move_speed: args.move_speed,
        ..GameConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32);
    let mut server = Server::new(&address, tick_duration, config).await?;

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            if let Err(e) = handle.send(ServerMessage::Shutdown) {
                error!("Failed to request shutdown: {}", e);
            }
        }
    });

    server.run().await
}
