//! Master binary

use clap::{Parser, Subcommand};
use shardkv::common::config::{Config, MasterConfig};
use shardkv::MasterServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-master")]
#[command(about = "shardkv master: topology owner and rebalance coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start master server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Discovery registry URL
        #[arg(long)]
        discovery: Option<String>,

        /// Number of shards the cluster starts with
        #[arg(long)]
        shards: Option<u32>,
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
            bind,
            discovery,
            shards,
        } => {
            // File/env config is the base; CLI arguments win.
            let mut config = Config::load().master.unwrap_or_else(MasterConfig::default);
            if let Some(bind) = bind {
                config.bind_addr = bind.parse()?;
            }
            if let Some(discovery) = discovery {
                config.discovery_url = discovery;
            }
            if let Some(shards) = shards {
                config.initial_shard_count = shards;
            }

            MasterServer::new(config).serve().await?;
        }
    }

    Ok(())
}
