//! warren node binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warren::common::{Config, Mode, SharedKey};
use warren::Node;

#[derive(Parser)]
#[command(name = "warrend")]
#[command(about = "warren replicated key-value store", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Operating mode (dev or cluster)
        #[arg(long)]
        mode: Option<String>,

        /// HTTP API port
        #[arg(long)]
        port: Option<u16>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Address peers use to reach this node
        #[arg(long)]
        advertise: Option<String>,

        /// Peer base URLs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,
    },

    /// Generate a fresh master key for value encryption
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            mode,
            port,
            db,
            advertise,
            peers,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(path)?,
                None => Config::default(),
            };
            // CLI arguments override the file
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(mode) = mode {
                config.mode = match mode.as_str() {
                    "cluster" => Mode::Cluster,
                    _ => Mode::Dev,
                };
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(db) = db {
                config.kv.db_path = db;
            }
            if let Some(advertise) = advertise {
                config.cluster.advertise_addr = advertise;
            }
            if !peers.is_empty() {
                config.cluster.peers = peers;
            }
            Node::new(config).serve().await?;
        }
        Commands::Keygen => {
            println!("{}", SharedKey::generate_master());
        }
    }

    Ok(())
}
