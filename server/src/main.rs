use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use server::auth::{Authenticator, MemoryAuthenticator};
use server::config::ServerConfig;
use server::descriptor::MapDescriptor;
use server::network::GameServer;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "8888")]
    port: u16,

    /// Maximum concurrent connections
    #[clap(long, default_value = "256")]
    max_connections: usize,

    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,

    /// Packet dispatch worker count
    #[clap(short, long, default_value = "4")]
    workers: usize,

    /// Path to a JSON map descriptor; omit for the built-in map
    #[clap(short, long)]
    map: Option<PathBuf>,

    /// Register unknown accounts on first login
    #[clap(long)]
    allow_auto_register: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port).parse()?,
        max_connections: args.max_connections,
        tick_period: Duration::from_secs_f32(1.0 / args.tick_rate as f32),
        worker_count: args.workers,
        allow_auto_register: args.allow_auto_register,
        ..ServerConfig::default()
    };

    let descriptor = match &args.map {
        Some(path) => MapDescriptor::load(path)?,
        None => {
            info!("no map descriptor given, using the built-in map");
            MapDescriptor::default_map()
        }
    };

    info!(
        "starting world server on {} ({} ticks/s, {} workers)",
        config.bind_addr, args.tick_rate, args.workers
    );

    let auth = Arc::new(MemoryAuthenticator::new()) as Arc<dyn Authenticator>;
    let server = Arc::new(GameServer::new(config, descriptor, auth));

    let runner = Arc::clone(&server);
    let run_handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!("server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    server.shutdown();
    run_handle.await?;

    Ok(())
}
