use clap::Parser;
use client::GameClient;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Number of ticks to play before disconnecting
    #[arg(short = 't', long, default_value = "600")]
    ticks: u32,

    /// Percent chance per tick of issuing a random move order
    #[arg(short = 'o', long, default_value = "20")]
    order_chance: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = GameClient::connect(&args.server).await?;
    info!(
        "Connected: slot {} on a {}x{} map",
        client.slot, client.map_width, client.map_height
    );

    let report = client.wait_for_start().await?;
    if let Some(reason) = report.down {
        warn!("Session ended before the game started: {}", reason);
        return Ok(());
    }
    info!(
        "Game on at tick {}: {} units visible",
        report.tick,
        client.mirror.units.len()
    );

    for _ in 0..args.ticks {
        maybe_issue_order(&mut client, args.order_chance).await?;

        let report = client.next_tick().await?;
        if let Some(reason) = report.down {
            info!("Session down: {}", reason);
            return Ok(());
        }
        debug!(
            "Tick {}: {} events, {} minerals, {} energy",
            report.tick,
            report.events.len(),
            client.mirror.minerals,
            client.mirror.energy
        );
    }

    info!("Played {} ticks, disconnecting", args.ticks);
    Ok(())
}

/// Sends a random move order for one of our units. Immobile picks are
/// fine; the server silently drops illegal orders.
async fn maybe_issue_order(
    client: &mut GameClient,
    chance: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = rand::thread_rng();
    if rng.gen_range(0..100) >= chance {
        return Ok(());
    }

    let own: Vec<u32> = client
        .mirror
        .units
        .iter()
        .filter(|(_, unit)| unit.owner == client.slot)
        .map(|(id, _)| *id)
        .collect();
    let unit = match own.choose(&mut rng) {
        Some(&unit) => unit,
        None => return Ok(()),
    };

    let x = rng.gen_range(0..client.map_width);
    let y = rng.gen_range(0..client.map_height);
    debug!("Ordering unit {} to ({}, {})", unit, x, y);
    client.order_move(unit, x, y).await?;
    Ok(())
}
