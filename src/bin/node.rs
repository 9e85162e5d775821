//! Storage node binary

use clap::{Parser, Subcommand};
use shardkv::common::config::{Config, NodeConfig};
use shardkv::NodeServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-node")]
#[command(about = "shardkv storage node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start storage node
    Serve {
        /// Server id, unique across the cluster
        #[arg(long)]
        id: u32,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Hostname other services reach this node at
        #[arg(long)]
        host: Option<String>,

        /// Discovery registry URL
        #[arg(long)]
        discovery: Option<String>,
    },
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
            id,
            bind,
            host,
            discovery,
        } => {
            let mut config = Config::load().node.unwrap_or_else(NodeConfig::default);
            config.node_id = id;
            if let Some(bind) = bind {
                config.bind_addr = bind.parse()?;
            }
            if let Some(host) = host {
                config.advertise_host = host;
            }
            if let Some(discovery) = discovery {
                config.discovery_url = discovery;
            }

            NodeServer::new(config).serve().await?;
        }
    }

    Ok(())
}
