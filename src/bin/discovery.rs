//! Discovery registry binary

use clap::{Parser, Subcommand};
use shardkv::common::config::{Config, DiscoveryConfig};
use shardkv::DiscoveryServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-discovery")]
#[command(about = "shardkv service discovery registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start discovery registry
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,
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
        Commands::Serve { bind } => {
            let mut config = Config::load()
                .discovery
                .unwrap_or_else(DiscoveryConfig::default);
            if let Some(bind) = bind {
                config.bind_addr = bind.parse()?;
            }

            DiscoveryServer::new(config).serve().await?;
        }
    }

    Ok(())
}
