use clap::Parser;
use server::network::{Server, ServerConfig};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener, and runs the
/// coordinator loop until the session ends.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "7777")]
        port: u16,
        /// Players required before the game starts
        #[clap(short = 'n', long, default_value = "2")]
        players: usize,
        /// Map width in cells
        #[clap(long, default_value = "32")]
        map_width: u32,
        /// Map height in cells
        #[clap(long, default_value = "32")]
        map_height: u32,
        /// Terrain seed; the same seed always produces the same map
        #[clap(short, long, default_value = "0")]
        seed: u64,
        /// Seconds to wait for tick confirmations before tearing the
        /// session down; 0 waits forever
        #[clap(short, long, default_value = "30")]
        tick_timeout: u64,
        /// Skip the time-sync rounds during the handshake
        #[clap(long)]
        no_time_sync: bool,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        required_players: args.players,
        map_width: args.map_width,
        map_height: args.map_height,
        map_seed: args.seed,
        tick_timeout: match args.tick_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        time_sync: !args.no_time_sync,
    };

    let mut server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
