use clap::Parser;
use log::info;
use rand::Rng;
use server::network::Server;
use shared::math::Vec3;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of concurrent peers
    #[arg(short, long, default_value = "8")]
    max_clients: usize,

    /// Number of tokens to spawn at startup
    #[arg(long, default_value = "3")]
    tokens: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f32(1.0 / args.tick_rate as f32);

    info!("Starting authority on {} at {}Hz", addr, args.tick_rate);

    let mut server = Server::new(&addr, tick_duration, args.max_clients).await?;

    // Scatter the initial tokens across the table
    let mut rng = rand::thread_rng();
    for _ in 0..args.tokens {
        let position = Vec3::new(rng.gen_range(-8.0..8.0), rng.gen_range(-5.0..5.0), 0.0);
        let object_id = server.spawn_token(position);
        info!("Spawned token {} at {:?}", object_id, position);
    }

    server.run().await?;

    Ok(())
}
