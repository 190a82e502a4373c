//! RLG Harvester - command line front end
//!
//! Fetches items, trades or achievements from Rocket League Garage and prints
//! them as a JSON array on stdout:
//!   rlg-harvester items [--no-cache]
//!   rlg-harvester trades [--url URL] [--max-trades N] [--concurrency N]
//!   rlg-harvester achievements [--no-cache]

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use rlg_harvester::{GarageClient, TradeQuery};

#[derive(Debug, Parser)]
#[command(name = "rlg-harvester", version, about = "Rocket League Garage data harvester")]
struct Cli {
    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Item catalog
    Items {
        /// Re-fetch pages instead of reusing cached ones
        #[arg(long)]
        no_cache: bool,
    },
    /// Latest trades, enriched with item metadata
    Trades {
        /// Custom start URL (e.g. a filtered trading page)
        #[arg(long)]
        url: Option<String>,
        /// Stop after this many trades (0 for no cap)
        #[arg(long, default_value_t = 100)]
        max_trades: usize,
        #[arg(long, default_value_t = 5)]
        concurrency: usize,
    },
    /// Achievements / trophies
    Achievements {
        #[arg(long)]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = GarageClient::from_env().context("Failed to configure harvester")?;
    info!("Channel directory: {}", client.settings().channel_dir.display());

    match cli.command {
        Commands::Items { no_cache } => {
            let items = client.get_items(!no_cache).await?;
            print_json(&items, cli.pretty)
        }
        Commands::Trades {
            url,
            max_trades,
            concurrency,
        } => {
            let query = TradeQuery {
                start_url: url,
                max_trades,
                concurrency,
            };
            let trades = client.get_trades(&query).await?;
            print_json(&trades, cli.pretty)
        }
        Commands::Achievements { no_cache } => {
            let achievements = client.get_achievements(!no_cache).await?;
            print_json(&achievements, cli.pretty)
        }
    }
}

fn print_json<T: Serialize>(records: &[T], pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(records)
    } else {
        serde_json::to_string(records)
    }
    .context("Failed to serialize records")?;
    println!("{}", out);
    Ok(())
}
